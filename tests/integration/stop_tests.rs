//! Shutdown draining.

use std::sync::Arc;
use std::time::Duration;

use ezoctl::ezo::{
    AtlasSensor, CompletionBehavior, CompletionCallback, Priority, Response, ResponseBody,
};
use ezoctl::ports::ReadingObserver;
use ezoctl::{Error, Result};
use parking_lot::Mutex;

use crate::mock_bus::{CountingObserver, MockBus, PLAIN_ADDRESS, plain_sensor, scheduler, wait_until};

type Log = Arc<Mutex<Vec<(String, Result<()>)>>>;

fn recorder(log: &Log, label: &str) -> CompletionCallback {
    let log = Arc::clone(log);
    let label = label.to_owned();
    Box::new(move |_: &AtlasSensor, response: &Response| {
        log.lock().push((label.clone(), response.status()));
    })
}

#[test]
fn stop_lets_in_flight_finish_and_interrupts_the_rest() {
    let bus = MockBus::new();
    let scheduler = scheduler("stop-drain");
    let sensor = plain_sensor(&bus, &scheduler);
    sensor.init_with(true).unwrap();
    assert!(wait_until(|| sensor.is_idle()));
    bus.clear_writes();

    let log: Log = Arc::default();
    let in_flight = sensor
        .command("find", ResponseBody::Raw, 50)
        .unwrap()
        .on_complete(recorder(&log, "find"));
    sensor.submit(in_flight, false).unwrap();
    for label in ["l,1", "l,0", "plock,?"] {
        let pending = sensor
            .command(label, ResponseBody::Raw, 5)
            .unwrap()
            .on_complete(recorder(&log, label));
        sensor.enqueue(pending);
    }
    assert_eq!(sensor.pending_commands(), 3);

    sensor.stop();

    assert_eq!(
        *log.lock(),
        [
            ("find".to_owned(), Ok(())),
            ("l,1".to_owned(), Err(Error::Interrupted)),
            ("l,0".to_owned(), Err(Error::Interrupted)),
            ("plock,?".to_owned(), Err(Error::Interrupted)),
        ]
    );
    assert!(sensor.is_idle());
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["find"]);
    scheduler.shutdown();
}

#[test]
fn in_flight_reading_cycle_keeps_its_result_on_stop() {
    let bus = MockBus::new();
    let scheduler = scheduler("stop-cycle");
    let sensor = plain_sensor(&bus, &scheduler);
    sensor.init_with(true).unwrap();
    assert!(wait_until(|| sensor.is_idle()));
    bus.clear_writes();

    let log: Log = Arc::default();
    let l = Arc::clone(&log);
    let reading = sensor
        .command("r", ResponseBody::Raw, 60)
        .unwrap()
        .with_behavior(CompletionBehavior::Reenqueue)
        .with_priority(Priority::READ)
        .on_complete(Box::new(move |sensor: &AtlasSensor, response: &Response| {
            l.lock().push(("r".to_owned(), response.status()));
            if response.is_ok() {
                sensor.handle_reading(response);
            }
        }));
    sensor.submit(reading, false).unwrap();

    sensor.stop();

    assert_eq!(*log.lock(), [("r".to_owned(), Ok(()))]);
    assert_eq!(sensor.last_value(), Some(7.0));
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["r"]);
    assert!(sensor.is_idle());
    scheduler.shutdown();
}

#[test]
fn stopped_driver_refuses_new_commands() {
    let bus = MockBus::new();
    let scheduler = scheduler("stop-refuse");
    let sensor = plain_sensor(&bus, &scheduler);
    sensor.init_with(true).unwrap();
    sensor.stop();

    assert!(sensor.is_stopped());
    assert_eq!(sensor.send_find(false, None), Err(Error::Interrupted));
    assert!(matches!(
        sensor.command("find", ResponseBody::Raw, 5),
        Err(Error::Interrupted)
    ));
    assert_eq!(sensor.enqueue_send_get_reading(), Err(Error::Interrupted));
    assert!(!sensor.is_reading_active());
    scheduler.shutdown();
}

#[test]
fn stop_ends_the_reading_loop() {
    let bus = MockBus::new();
    let scheduler = scheduler("stop-loop");
    let sensor = plain_sensor(&bus, &scheduler);
    let observer = Arc::new(CountingObserver::default());
    sensor
        .add_observer(Arc::clone(&observer) as Arc<dyn ReadingObserver>)
        .unwrap();
    sensor.init().unwrap();
    assert!(wait_until(|| observer.count() >= 2));

    sensor.stop();

    assert!(!sensor.is_reading_active());
    assert!(sensor.is_idle());
    let writes = bus.writes_to(PLAIN_ADDRESS).len();
    let readings = observer.count();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(bus.writes_to(PLAIN_ADDRESS).len(), writes);
    assert_eq!(observer.count(), readings);
    scheduler.shutdown();
}

#[test]
fn synchronous_waiter_is_released_with_interrupted() {
    let bus = MockBus::new();
    let scheduler = scheduler("stop-waiter");
    let sensor = plain_sensor(&bus, &scheduler);
    sensor.init_with(true).unwrap();
    assert!(wait_until(|| sensor.is_idle()));

    // Occupy the slot long enough for the waiter to queue behind it.
    let blocker = sensor.command("find", ResponseBody::Raw, 100).unwrap();
    sensor.submit(blocker, false).unwrap();

    let waiter = {
        let sensor = Arc::clone(&sensor);
        std::thread::spawn(move || {
            let command = sensor.command("l,?", ResponseBody::Raw, 5)?;
            sensor.submit(command, true)
        })
    };
    assert!(wait_until(|| sensor.pending_commands() == 1));
    sensor.stop();

    assert_eq!(waiter.join().unwrap(), Err(Error::Interrupted));
    scheduler.shutdown();
}
