// tests/mailbox_delivery.rs

mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::TeamFixture;
use taskgrid::mailbox::{MessageBody, MessageFilter, MessageKind, wait_for_unread};

#[test]
fn concurrent_senders_lose_no_messages() {
    let fixture = TeamFixture::new();
    fixture.grid().mailbox().create_inbox("lead").unwrap();

    const SENDERS: usize = 4;
    const EACH: usize = 5;
    let barrier = Arc::new(Barrier::new(SENDERS));
    let handles: Vec<_> = (0..SENDERS)
        .map(|i| {
            let grid = fixture.reopen();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let from = format!("worker-{i}");
                barrier.wait();
                for n in 0..EACH {
                    grid.mailbox()
                        .send(&from, "lead", MessageBody::Message { text: format!("{from}:{n}") })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let inbox = fixture.grid().mailbox().read("lead", &MessageFilter::default()).unwrap();
    assert_eq!(inbox.len(), SENDERS * EACH);

    // Per-sender order is preserved.
    for i in 0..SENDERS {
        let from = format!("worker-{i}");
        let texts: Vec<String> = inbox
            .iter()
            .filter(|m| m.from == from)
            .map(|m| match &m.body {
                MessageBody::Message { text } => text.clone(),
                other => panic!("unexpected body {other:?}"),
            })
            .collect();
        let expected: Vec<String> = (0..EACH).map(|n| format!("{from}:{n}")).collect();
        assert_eq!(texts, expected);
    }
}

#[test]
fn senders_sharing_an_identity_lose_no_messages() {
    let fixture = TeamFixture::new();
    fixture.grid().mailbox().create_inbox("w1").unwrap();

    const SENDERS: usize = 4;
    const EACH: usize = 25;
    let barrier = Arc::new(Barrier::new(SENDERS + 1));
    let mut handles: Vec<_> = (0..SENDERS)
        .map(|i| {
            let grid = fixture.reopen();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for n in 0..EACH {
                    grid.mailbox()
                        .send("lead", "w1", MessageBody::Message { text: format!("{i}:{n}") })
                        .unwrap();
                }
            })
        })
        .collect();

    // The recipient keeps marking its own mail read while the sends land.
    let reader = fixture.reopen();
    let reader_barrier = barrier.clone();
    handles.push(thread::spawn(move || {
        reader_barrier.wait();
        for _ in 0..EACH {
            let unread = reader.mailbox().read("w1", &MessageFilter::unread()).unwrap();
            if let Some(first) = unread.first() {
                reader.mailbox().mark_as_read("w1", &first.id).unwrap();
            }
        }
    }));
    for h in handles {
        h.join().unwrap();
    }

    let inbox = fixture.grid().mailbox().read("w1", &MessageFilter::default()).unwrap();
    assert_eq!(inbox.len(), SENDERS * EACH);
}

#[test]
fn shutdown_handshake_round_trips_through_inboxes() {
    let fixture = TeamFixture::new();
    let mailbox = fixture.grid().mailbox();

    mailbox
        .send(
            "lead",
            "w1",
            MessageBody::ShutdownRequest {
                request_id: "r1".into(),
                reason: "all waves verified".into(),
            },
        )
        .unwrap();

    let request = mailbox
        .read(
            "w1",
            &MessageFilter {
                unread_only: true,
                kind: Some(MessageKind::ShutdownRequest),
            },
        )
        .unwrap();
    assert_eq!(request.len(), 1);
    mailbox.mark_as_read("w1", &request[0].id).unwrap();

    mailbox
        .send(
            "w1",
            "lead",
            MessageBody::ShutdownResponse {
                request_id: "r1".into(),
                approved: true,
                reason: None,
            },
        )
        .unwrap();

    let reply = mailbox.read("lead", &MessageFilter::unread()).unwrap();
    assert!(matches!(
        &reply[0].body,
        MessageBody::ShutdownResponse { approved: true, .. }
    ));
    assert!(mailbox.read("w1", &MessageFilter::unread()).unwrap().is_empty());
}

#[tokio::test]
async fn waiter_sees_mail_from_another_handle() {
    let fixture = TeamFixture::new();
    let other = fixture.reopen();

    let sender = tokio::task::spawn_blocking(move || {
        std::thread::sleep(Duration::from_millis(100));
        other
            .mailbox()
            .send("lead", "w1", MessageBody::Message { text: "start wave 1".into() })
            .unwrap();
    });

    let got = taskgrid_test_utils::with_timeout(wait_for_unread(
        fixture.grid().mailbox(),
        "w1",
        Duration::from_secs(3),
    ))
    .await
    .unwrap();
    sender.await.unwrap();
    assert_eq!(got.len(), 1);
}
