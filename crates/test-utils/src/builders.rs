use taskgrid::store::Task;

/// Builder for `Task` to simplify test setup.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: Task::new(id, format!("task {id}")),
        }
    }

    pub fn role(mut self, role: &str) -> Self {
        self.task.role = Some(role.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.blocked_by.push(dep.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
