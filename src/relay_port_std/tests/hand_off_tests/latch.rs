//! An interrupt latches events for a higher-priority handler task.
use relay_kernel::{EventLatch, Port, TakeError, Timeout};
use relay_port_std::StdPort;
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use crate::{init_logger, SeqTracker};

const RECV_TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn burst_then_timeout() {
    init_logger();
    static SEQ: SeqTracker = SeqTracker::new();

    let port = StdPort::new();
    let latch = Arc::new(EventLatch::build().maximum(10).finish(&port).unwrap());
    let (done_send, done_recv) = mpsc::channel();

    // Handler task
    let latch2 = Arc::clone(&latch);
    let port2 = port.clone();
    port.spawn("Handler", 3, move || {
        for i in 0..3 {
            latch2.take(Timeout::Forever).unwrap();
            log::info!("Handler task - Processing event {}.", i);
            SEQ.expect_and_replace(1 + i, 2 + i);
        }

        let start = port2.tick_count();
        let result = latch2.take(Timeout::from_millis(50, port2.config()));
        let elapsed = port2.tick_count() - start;
        done_send.send((result, elapsed)).unwrap();
    })
    .unwrap();

    // Periodic task
    let latch2 = Arc::clone(&latch);
    let port2 = port.clone();
    port.spawn("Periodic", 1, move || {
        while latch2.waiting_tasks() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        SEQ.expect_and_replace(0, 1);

        log::info!("Periodic task - About to generate an interrupt.");
        let (results, yielded) = port2.pend_interrupt(|isr| {
            (0..3)
                .map(|_| latch2.give_from_isr(isr))
                .collect::<Vec<_>>()
        });
        log::info!("Periodic task - Interrupt generated.");

        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
        // The first event woke the handler, which outranks this task
        assert_eq!(results[0], Ok(true));
        assert!(yielded);
    })
    .unwrap();

    let (result, elapsed) = done_recv.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(result, Err(TakeError::Timeout));
    assert!(elapsed >= 50, "elapsed = {}", elapsed);
    assert_eq!(SEQ.get(), 4);
    assert_eq!(latch.count(), 0);
    assert!(port.reschedule_requests() >= 1);
}

#[test]
fn isr_events_are_counted_before_the_handler_runs() {
    init_logger();
    let port = StdPort::new();
    let latch = EventLatch::build().maximum(10).finish(&port).unwrap();

    let ((), yielded) = port.pend_interrupt(|isr| {
        for _ in 0..3 {
            assert_eq!(latch.give_from_isr(isr), Ok(false));
        }
    });
    assert!(!yielded);
    assert_eq!(latch.count(), 3);

    assert_eq!(latch.try_take(), Ok(()));
    assert_eq!(latch.count(), 2);
    assert_eq!(latch.try_take(), Ok(()));
    assert_eq!(latch.try_take(), Ok(()));
    assert_eq!(latch.count(), 0);

    // Outside a task, block times are ignored
    assert_eq!(latch.take(Timeout::Forever), Err(TakeError::Timeout));
}

#[test]
fn abort_releases_a_blocked_taker() {
    init_logger();
    let port = StdPort::new();
    let latch = Arc::new(EventLatch::build().finish(&port).unwrap());
    let (send, recv) = mpsc::channel();

    let latch2 = Arc::clone(&latch);
    let task = port
        .spawn("Taker", 2, move || {
            send.send(latch2.take(Timeout::Forever)).unwrap();
        })
        .unwrap();

    while latch.waiting_tasks() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(latch.abort_wait(task));
    assert_eq!(recv.recv_timeout(RECV_TIMEOUT).unwrap(), Err(TakeError::Timeout));
    assert_eq!(latch.waiting_tasks(), 0);
}
