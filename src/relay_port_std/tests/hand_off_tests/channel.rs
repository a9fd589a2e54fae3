//! Channels shared by interrupt handlers and tasks.
use relay_kernel::{Channel, Port, Timeout, TryReceiveError, TrySendError};
use relay_port_std::StdPort;
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use crate::{init_logger, SeqTracker};

const RECV_TIMEOUT: Duration = Duration::from_secs(30);

const STRINGS: [&str; 4] = ["String 0\r\n", "String 1\r\n", "String 2\r\n", "String 3\r\n"];

/// An interrupt handler drains a channel of integers and translates them
/// into strings for a printer task.
#[test]
fn isr_translates_between_channels() {
    init_logger();
    static SEQ: SeqTracker = SeqTracker::new();

    let port = StdPort::new();
    let integers: Arc<Channel<u32, _>> =
        Arc::new(Channel::build().capacity(10).finish(&port).unwrap());
    let strings: Arc<Channel<&'static str, _>> =
        Arc::new(Channel::build().capacity(10).finish(&port).unwrap());
    let (out_send, out_recv) = mpsc::channel();

    // String printer task
    let strings2 = Arc::clone(&strings);
    port.spawn("Printer", 2, move || {
        for _ in 0..5 {
            let s = strings2.receive(Timeout::Forever).unwrap();
            out_send.send(s).unwrap();
        }
    })
    .unwrap();

    // Integer generator task
    let port2 = port.clone();
    port.spawn("IntGen", 1, move || {
        SEQ.expect_and_replace(0, 1);
        for i in 0..5 {
            integers.send(i, Timeout::NoWait).unwrap();
        }
        assert_eq!(integers.len(), 5);

        log::info!("Generator task - About to generate an interrupt.");
        let ((), _) = port2.pend_interrupt(|isr| loop {
            match integers.receive_from_isr(isr) {
                Ok((value, _)) => {
                    let s = STRINGS[(value & 0x3) as usize];
                    strings.send_from_isr(isr, s).unwrap();
                }
                Err(TryReceiveError::Empty) => break,
            }
        });
        log::info!("Generator task - Interrupt generated.");
        assert!(integers.is_empty());
        SEQ.expect_and_replace(1, 2);
    })
    .unwrap();

    let received: Vec<_> = (0..5)
        .map(|_| out_recv.recv_timeout(RECV_TIMEOUT).unwrap())
        .collect();
    assert_eq!(
        received,
        [STRINGS[0], STRINGS[1], STRINGS[2], STRINGS[3], STRINGS[0]]
    );
}

/// Two low-priority senders feed a higher-priority receiver through a
/// small channel.
#[test]
fn senders_and_receiver() {
    init_logger();
    const PER_SENDER: u32 = 20;

    let port = StdPort::new();
    let channel: Arc<Channel<(u32, u32), _>> =
        Arc::new(Channel::build().capacity(5).finish(&port).unwrap());
    let (out_send, out_recv) = mpsc::channel();

    for sender in [100, 200] {
        let channel = Arc::clone(&channel);
        let port2 = port.clone();
        port.spawn("Sender", 1, move || {
            for i in 0..PER_SENDER {
                channel
                    .send((sender, i), Timeout::from_millis(1000, port2.config()))
                    .unwrap();
            }
        })
        .unwrap();
    }

    let channel2 = Arc::clone(&channel);
    port.spawn("Receiver", 2, move || {
        for _ in 0..PER_SENDER * 2 {
            let item = channel2.receive(Timeout::Forever).unwrap();
            out_send.send(item).unwrap();
        }
    })
    .unwrap();

    let received: Vec<(u32, u32)> = (0..PER_SENDER * 2)
        .map(|_| out_recv.recv_timeout(RECV_TIMEOUT).unwrap())
        .collect();

    // Each sender's items arrive in the order they were sent
    for sender in [100, 200] {
        let seq: Vec<u32> = received
            .iter()
            .filter(|(s, _)| *s == sender)
            .map(|&(_, i)| i)
            .collect();
        assert_eq!(seq, (0..PER_SENDER).collect::<Vec<_>>());
    }
    assert!(channel.is_empty());
}

#[test]
fn fifo_across_contexts() {
    init_logger();
    let port = StdPort::new();
    let channel: Arc<Channel<u32, _>> =
        Arc::new(Channel::build().capacity(8).finish(&port).unwrap());

    for i in 0..3 {
        channel.try_send(i).unwrap();
    }
    port.pend_interrupt(|isr| {
        for i in 3..6 {
            assert_eq!(channel.send_from_isr(isr, i), Ok(false));
        }
    });
    channel.send(6, Timeout::Forever).unwrap();

    let (send, recv) = mpsc::channel();
    let channel2 = Arc::clone(&channel);
    port.spawn("Receiver", 1, move || {
        let items: Vec<u32> = (0..7)
            .map(|_| channel2.receive(Timeout::Forever).unwrap())
            .collect();
        send.send(items).unwrap();
    })
    .unwrap();

    assert_eq!(
        recv.recv_timeout(RECV_TIMEOUT).unwrap(),
        (0..7).collect::<Vec<_>>()
    );
}

#[test]
fn isr_send_to_full_channel_fails() {
    init_logger();
    let port = StdPort::new();
    let channel: Channel<u32, _> = Channel::build().capacity(2).finish(&port).unwrap();
    channel.try_send(1).unwrap();
    channel.try_send(2).unwrap();

    let (result, yielded) = port.pend_interrupt(|isr| channel.send_from_isr(isr, 3));
    assert_eq!(result, Err(TrySendError::Full(3)));
    assert!(!yielded);
    assert_eq!(channel.len(), 2);
    assert_eq!(channel.try_receive(), Ok(1));
}

#[test]
fn blocked_receiver_is_woken_by_isr() {
    init_logger();
    let port = StdPort::new();
    let channel: Arc<Channel<u32, _>> =
        Arc::new(Channel::build().capacity(1).finish(&port).unwrap());
    let (send, recv) = mpsc::channel();

    let channel2 = Arc::clone(&channel);
    port.spawn("Receiver", 3, move || {
        send.send(channel2.receive(Timeout::Forever)).unwrap();
    })
    .unwrap();

    while channel.waiting_receivers() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let (result, _) = port.pend_interrupt(|isr| channel.send_from_isr(isr, 42));
    // Boot code has no priority, so any woken task outranks it
    assert_eq!(result, Ok(true));
    assert_eq!(recv.recv_timeout(RECV_TIMEOUT).unwrap(), Ok(42));
    assert!(channel.is_empty());
}
