//! Integration tests for delivery order and subscription semantics.

use herald::{Author, BufferedMessenger, IdentityKey, Messenger, Receiver, Subscriber};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Minimal receiver for tests that don't need registry bookkeeping.
struct Listener {
    key: IdentityKey,
}

impl Listener {
    fn new() -> Arc<Self> {
        Arc::new(Listener {
            key: IdentityKey::issue(),
        })
    }
}

impl Receiver for Listener {
    fn receiver_key(&self) -> IdentityKey {
        self.key
    }
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

// --- Ordering ---

#[test]
fn test_every_subscriber_sees_send_order() {
    let messenger = Messenger::<u32>::new();
    let listeners: Vec<Arc<Listener>> = (0..3).map(|_| Listener::new()).collect();
    let logs: Vec<Log<u32>> = (0..3).map(|_| log()).collect();

    let _connections: Vec<_> = listeners
        .iter()
        .zip(&logs)
        .map(|(listener, log)| {
            let log = Arc::clone(log);
            messenger.subscribe(listener, move |m| log.lock().push(*m))
        })
        .collect();

    for i in 0..20 {
        messenger.send(i);
    }

    let expected: Vec<u32> = (0..20).collect();
    for log in &logs {
        assert_eq!(*log.lock(), expected);
    }
}

#[test]
fn test_subscribers_visited_in_subscription_order() {
    let messenger = Messenger::<()>::new();
    let listeners: Vec<Arc<Listener>> = (0..5).map(|_| Listener::new()).collect();
    let visits = log();

    let _connections: Vec<_> = listeners
        .iter()
        .enumerate()
        .map(|(index, listener)| {
            let visits = Arc::clone(&visits);
            messenger.subscribe(listener, move |_| visits.lock().push(index))
        })
        .collect();

    messenger.send(());
    assert_eq!(*visits.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_reentrant_send_finishes_current_message_first() {
    let messenger = Messenger::<i32>::new();
    let a = Listener::new();
    let b = Listener::new();
    let received = log();

    let weak = messenger.downgrade();
    let sink = Arc::clone(&received);
    let _a = messenger.subscribe(&a, move |m| {
        sink.lock().push(*m);
        if *m == 0 {
            if let Some(messenger) = weak.upgrade() {
                messenger.send(1);
            }
        }
    });

    let weak = messenger.downgrade();
    let sink = Arc::clone(&received);
    let _b = messenger.subscribe(&b, move |m| {
        sink.lock().push(*m);
        if *m == 0 {
            if let Some(messenger) = weak.upgrade() {
                messenger.send(2);
            }
        }
    });

    messenger.send(0);

    let received = received.lock();
    assert_eq!(received.len(), 6);
    assert_eq!(received[0], 0);
    assert_eq!(received[1], 0);
    assert_eq!(received[2], received[3]);
    assert_eq!(received[4], received[5]);
    assert_eq!(*received, vec![0, 0, 1, 1, 2, 2]);
}

#[test]
fn test_deep_reentrancy_is_iterative() {
    let messenger = Messenger::<u32>::new();
    let listener = Listener::new();
    let count = Arc::new(Mutex::new(0u32));

    let weak = messenger.downgrade();
    let counter = Arc::clone(&count);
    let _connection = messenger.subscribe(&listener, move |m| {
        *counter.lock() += 1;
        if *m < 50_000 {
            if let Some(messenger) = weak.upgrade() {
                messenger.send(m + 1);
            }
        }
    });

    messenger.send(0);
    assert_eq!(*count.lock(), 50_001);
}

// --- Subscription semantics ---

#[test]
fn test_filter_suppresses_rejected_messages() {
    let messenger = Messenger::<Option<i32>>::new();
    let listener = Listener::new();
    let received = log();
    let sink = Arc::clone(&received);

    let _connection = messenger.subscribe_filtered(
        &listener,
        |m: &Option<i32>| m.is_some(),
        move |m, _| sink.lock().push(*m),
    );

    messenger.send(Some(3));
    messenger.send(None);

    assert_eq!(*received.lock(), vec![Some(3)]);
    assert!(messenger.is_subscribed(listener.as_ref()));
}

#[test]
fn test_resubscribe_replaces_callback() {
    let messenger = Messenger::<i32>::new();
    let listener = Listener::new();
    let received = log();

    let first_sink = Arc::clone(&received);
    let first = messenger.subscribe(&listener, move |m| first_sink.lock().push(("first", *m)));
    let second_sink = Arc::clone(&received);
    let second = messenger.subscribe(&listener, move |m| second_sink.lock().push(("second", *m)));

    messenger.send(1);
    assert_eq!(*received.lock(), vec![("second", 1)]);

    // The replaced connection no longer owns the slot.
    assert!(!first.is_active());
    drop(first);
    messenger.send(2);
    assert_eq!(*received.lock(), vec![("second", 1), ("second", 2)]);
    assert!(second.is_active());
}

#[test]
fn test_author_defaults_to_messenger() {
    let messenger = Messenger::<&'static str>::new();
    let listener = Listener::new();
    let authors: Log<Author> = log();
    let sink = Arc::clone(&authors);

    let _connection = messenger.subscribe_with_author(&listener, move |_, author| {
        sink.lock().push(author);
    });

    messenger.send("from messenger");
    messenger.send_from("from listener", listener.key);

    assert_eq!(*authors.lock(), vec![messenger.key(), listener.key]);
}

#[test]
fn test_late_joiner_starts_with_next_message() {
    let messenger = Messenger::<i32>::new();
    let early = Listener::new();
    let late = Listener::new();
    let received = log();
    let late_connection = Arc::new(Mutex::new(None));

    let weak = messenger.downgrade();
    let sink = Arc::clone(&received);
    let late_for_callback = Arc::clone(&late);
    let slot = Arc::clone(&late_connection);
    let _early = messenger.subscribe(&early, move |m| {
        sink.lock().push(("early", *m));
        if *m == 1 {
            if let Some(messenger) = weak.upgrade() {
                let late_sink = Arc::clone(&sink);
                let connection = messenger.subscribe(&late_for_callback, move |m| {
                    late_sink.lock().push(("late", *m));
                });
                *slot.lock() = Some(connection);
                messenger.send(2);
            }
        }
    });

    messenger.send(1);

    assert_eq!(
        *received.lock(),
        vec![("early", 1), ("early", 2), ("late", 2)]
    );
}

#[test]
fn test_unsubscribe_during_fanout_skips_removed_receiver() {
    let messenger = Messenger::<i32>::new();
    let first = Listener::new();
    let second = Listener::new();
    let received = log();

    let weak = messenger.downgrade();
    let second_key = second.key;
    let sink = Arc::clone(&received);
    let _first = messenger.subscribe(&first, move |m| {
        sink.lock().push(("first", *m));
        if let Some(messenger) = weak.upgrade() {
            messenger.unsubscribe(second_key);
        }
    });
    let sink = Arc::clone(&received);
    let _second = messenger.subscribe(&second, move |m| sink.lock().push(("second", *m)));

    messenger.send(1);
    messenger.send(2);

    assert_eq!(*received.lock(), vec![("first", 1), ("first", 2)]);
}

#[test]
fn test_shared_key_reports_only_current_receiver() {
    let messenger = Messenger::<i32>::new();
    let key = IdentityKey::issue();
    let first = Arc::new(Listener { key });
    let second = Arc::new(Listener { key });
    let received = log();

    let sink = Arc::clone(&received);
    let _first = messenger.subscribe(&first, move |m| sink.lock().push(("first", *m)));
    let sink = Arc::clone(&received);
    let _second = messenger.subscribe(&second, move |m| sink.lock().push(("second", *m)));

    messenger.send(1);

    assert_eq!(*received.lock(), vec![("second", 1)]);
    assert!(!messenger.is_subscribed(first.as_ref()));
    assert!(messenger.is_subscribed(second.as_ref()));
    assert_eq!(messenger.receiver_count(), 1);
}

#[test]
fn test_subscriber_observes_many_message_types() {
    let numbers = Messenger::<i64>::new();
    let words = Messenger::<String>::new();
    let subscriber = Arc::new(Subscriber::with_registry(Arc::new(herald::Registry::new())));
    let received = log();

    let sink = Arc::clone(&received);
    subscriber.observe(&numbers, move |n| sink.lock().push(n.to_string()));
    let sink = Arc::clone(&received);
    subscriber.observe(&words, move |w| sink.lock().push(w.clone()));

    numbers.send(7);
    words.send("seven".to_string());

    subscriber.stop_all_observing();
    numbers.send(8);
    words.send("eight".to_string());

    assert_eq!(*received.lock(), vec!["7".to_string(), "seven".to_string()]);
}

// --- Threads ---

#[test]
fn test_concurrent_senders_deliver_everything_once() {
    let messenger = Messenger::<(usize, usize)>::new();
    let listener = Listener::new();
    let received = log();
    let sink = Arc::clone(&received);

    let _connection = messenger.subscribe(&listener, move |m| sink.lock().push(*m));

    let handles: Vec<_> = (0..4)
        .map(|thread| {
            let messenger = messenger.clone();
            std::thread::spawn(move || {
                for i in 0..250 {
                    messenger.send((thread, i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let received = received.lock();
    assert_eq!(received.len(), 1000);

    // Each thread's messages keep their relative order.
    for thread in 0..4 {
        let own: Vec<usize> = received
            .iter()
            .filter(|(t, _)| *t == thread)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(own, (0..250).collect::<Vec<_>>());
    }
}

#[test]
fn test_send_from_other_thread_waits_for_delivery() {
    let messenger = BufferedMessenger::<u32>::new();
    let listener = Listener::new();
    let received = log();
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);

    let sink = Arc::clone(&received);
    let _connection = messenger.subscribe(&listener, move |m| {
        if *m == 0 {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(100));
        }
        sink.lock().push(*m);
    });

    let sender = messenger.clone();
    let slow = std::thread::spawn(move || sender.send(0));
    started_rx.recv().unwrap();

    // Thread `slow` is mid-delivery; this send must still return only once
    // its own message has reached every subscriber.
    messenger.send(5);
    assert_eq!(*received.lock(), vec![0, 5]);
    assert_eq!(messenger.latest(), 5);

    slow.join().unwrap();
}
