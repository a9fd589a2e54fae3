//! The timer service on real time.
use relay_kernel::{Port, Ticks, Timeout, Timer, TimerService, SERVICE_TASK_NAME};
use relay_port_std::StdPort;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::init_logger;

const WAIT_LIMIT: Duration = Duration::from_secs(30);

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
fn one_shot_and_auto_reload() {
    init_logger();
    const ONE_SHOT_PERIOD: Ticks = 3333;
    const AUTO_RELOAD_PERIOD: Ticks = 500;

    let port = StdPort::new();
    let service = Arc::new(TimerService::new(&port).unwrap());

    let one_shot_fires = Arc::new(Mutex::new(Vec::new()));
    let auto_reload_fires = Arc::new(Mutex::new(Vec::new()));

    let fires = Arc::clone(&one_shot_fires);
    let one_shot = Timer::build()
        .name("OneShot")
        .period(ONE_SHOT_PERIOD)
        .callback(move |fire| {
            log::info!("One-shot timer callback executing {}", fire.now);
            fires.lock().unwrap().push(fire.now);
        })
        .finish(&*service)
        .unwrap();

    let fires = Arc::clone(&auto_reload_fires);
    let auto_reload = Timer::build()
        .name("AutoReload")
        .period(AUTO_RELOAD_PERIOD)
        .auto_reload(true)
        .callback(move |fire| {
            log::info!("Auto-reload timer callback executing {}", fire.now);
            fires.lock().unwrap().push(fire.now);
        })
        .finish(&*service)
        .unwrap();

    // Before the service runs, the commands are queued
    let start = port.tick_count();
    service.start(one_shot, Timeout::Forever).unwrap();
    service.start(auto_reload, Timeout::Forever).unwrap();
    assert_eq!(service.pending_commands(), 2);

    let task = service.spawn().unwrap();
    assert_eq!(port.task_name(task), Some(SERVICE_TASK_NAME));

    thread::sleep(Duration::from_millis(1250));
    assert_eq!(auto_reload_fires.lock().unwrap().len(), 2);
    assert!(one_shot_fires.lock().unwrap().is_empty());
    assert_eq!(service.is_active(one_shot), Ok(true));

    assert!(wait_until(|| !one_shot_fires.lock().unwrap().is_empty()));
    let one_shot_fires = one_shot_fires.lock().unwrap().clone();
    assert_eq!(one_shot_fires.len(), 1);
    assert!(one_shot_fires[0] >= start + ONE_SHOT_PERIOD);
    assert!(wait_until(|| service.is_active(one_shot) == Ok(false)));

    service.stop(auto_reload, Timeout::Forever).unwrap();
    assert!(wait_until(|| service.is_active(auto_reload) == Ok(false)));
    let auto_reload_fires = auto_reload_fires.lock().unwrap().clone();
    assert!(auto_reload_fires.len() >= 6, "{:?}", auto_reload_fires);
    assert!(auto_reload_fires[0] >= start + AUTO_RELOAD_PERIOD);
    for pair in auto_reload_fires.windows(2) {
        assert!(pair[1] - pair[0] >= AUTO_RELOAD_PERIOD, "{:?}", pair);
    }
}

#[test]
fn deleted_timer_never_fires() {
    init_logger();
    let port = StdPort::new();
    let service = Arc::new(TimerService::new(&port).unwrap());
    service.spawn().unwrap();

    let fired = Arc::new(Mutex::new(false));
    let fired2 = Arc::clone(&fired);
    let timer = Timer::build()
        .period(50)
        .callback(move |_| *fired2.lock().unwrap() = true)
        .finish(&*service)
        .unwrap();

    service.start(timer, Timeout::Forever).unwrap();
    service.delete(timer, Timeout::Forever).unwrap();
    assert!(service.period(timer).is_err());

    thread::sleep(Duration::from_millis(200));
    assert!(!*fired.lock().unwrap());
}

#[test]
fn isr_pends_call_to_service_task() {
    init_logger();
    static CALLS: Mutex<Vec<(usize, u32)>> = Mutex::new(Vec::new());

    fn deferred_handler(arg1: usize, arg2: u32) {
        CALLS.lock().unwrap().push((arg1, arg2));
    }

    let port = StdPort::new();
    let service = Arc::new(TimerService::new(&port).unwrap());
    service.spawn().unwrap();

    for i in 0..3 {
        let (result, _) =
            port.pend_interrupt(|isr| service.pend_call_from_isr(isr, deferred_handler, 7, i));
        result.unwrap();
    }

    assert!(wait_until(|| CALLS.lock().unwrap().len() == 3));
    assert_eq!(*CALLS.lock().unwrap(), [(7, 0), (7, 1), (7, 2)]);
}

#[test]
fn reset_from_isr_postpones_expiry() {
    init_logger();
    let port = StdPort::new();
    let service = Arc::new(TimerService::new(&port).unwrap());
    service.spawn().unwrap();

    let fires = Arc::new(Mutex::new(Vec::new()));
    let fires2 = Arc::clone(&fires);
    let timer = Timer::build()
        .period(200)
        .callback(move |fire| fires2.lock().unwrap().push(fire.now))
        .finish(&*service)
        .unwrap();

    service.start(timer, Timeout::Forever).unwrap();
    thread::sleep(Duration::from_millis(100));
    let reset_at = port.tick_count();
    let (result, _) = port.pend_interrupt(|isr| service.reset_from_isr(isr, timer));
    result.unwrap();

    assert!(wait_until(|| !fires.lock().unwrap().is_empty()));
    let fires = fires.lock().unwrap().clone();
    assert_eq!(fires.len(), 1);
    assert!(fires[0] >= reset_at + 200, "{} < {} + 200", fires[0], reset_at);
}
