//! Interrupt handlers defer their processing to the dispatcher task.
use relay_kernel::{Dispatcher, Port, Timeout};
use relay_port_std::StdPort;
use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::init_logger;

const WAIT_LIMIT: Duration = Duration::from_secs(30);

/// Poll `cond` until it holds or [`WAIT_LIMIT`] elapses.
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > WAIT_LIMIT {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

#[test]
fn deferred_interrupt_processing() {
    init_logger();
    static CALLS: Mutex<Vec<(usize, u32)>> = Mutex::new(Vec::new());

    fn deferred_handler(arg1: usize, arg2: u32) {
        log::info!("Handler function - Processing event {}", arg2);
        CALLS.lock().unwrap().push((arg1, arg2));
    }

    let port = StdPort::new();
    let dispatcher = Arc::new(
        Dispatcher::build()
            .name("Daemon")
            .priority(6)
            .capacity(10)
            .finish(&port)
            .unwrap(),
    );
    let task = dispatcher.spawn().unwrap();
    assert_eq!(port.task_name(task), Some("Daemon"));

    let (done_send, done_recv) = mpsc::channel();
    let dispatcher2 = Arc::clone(&dispatcher);
    let port2 = port.clone();
    port.spawn("Periodic", 1, move || {
        for i in 0..5u32 {
            port2.delay(port2.config().ms_to_ticks(10));
            log::info!("Periodic task - About to generate an interrupt.");
            let (result, _) = port2.pend_interrupt(|isr| {
                dispatcher2.pend_from_isr(isr, deferred_handler, 0xcafe, i)
            });
            result.unwrap();
        }
        done_send.send(()).unwrap();
    })
    .unwrap();

    done_recv.recv_timeout(WAIT_LIMIT).unwrap();
    assert!(wait_until(|| CALLS.lock().unwrap().len() == 5));
    assert_eq!(
        *CALLS.lock().unwrap(),
        (0..5).map(|i| (0xcafe, i)).collect::<Vec<_>>()
    );
    assert_eq!(dispatcher.dropped(), 0);
    assert!(wait_until(|| dispatcher.pending() == 0));
}

#[test]
fn calls_pended_before_start_run_in_order() {
    init_logger();
    static CALLS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

    fn record(_: usize, arg2: u32) {
        CALLS.lock().unwrap().push(arg2);
    }

    let port = StdPort::new();
    let dispatcher = Arc::new(Dispatcher::build().capacity(4).finish(&port).unwrap());

    // Boot code can't wait, so the fifth call is dropped
    for i in 0..4 {
        dispatcher.pend(record, 0, i, Timeout::Forever).unwrap();
    }
    assert!(dispatcher.pend(record, 0, 4, Timeout::Forever).is_err());
    assert_eq!(dispatcher.pending(), 4);

    dispatcher.spawn().unwrap();
    assert!(wait_until(|| CALLS.lock().unwrap().len() == 4));
    assert_eq!(*CALLS.lock().unwrap(), [0, 1, 2, 3]);
}
