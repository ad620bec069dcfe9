//! Command queue and state machine tests against the mock bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ezoctl::Error;
use ezoctl::ezo::{
    AtlasSensor, CompletionBehavior, FirmwareVersion, Priority, Response, ResponseBody,
    success_frame,
};
use ezoctl::ports::ReadingObserver;
use parking_lot::Mutex;

use crate::mock_bus::{
    CountingObserver, MockBus, PLAIN_ADDRESS, plain_sensor, scheduler, still_processing,
    syntax_error, wait_until,
};

fn ready_sensor(bus: &Arc<MockBus>, name: &str) -> (ezoctl::dispatch::Scheduler, Arc<AtlasSensor>) {
    let scheduler = scheduler(name);
    let sensor = plain_sensor(bus, &scheduler);
    sensor.init_with(true).unwrap();
    assert!(wait_until(|| sensor.is_idle()));
    bus.clear_writes();
    (scheduler, sensor)
}

#[test]
fn init_queries_the_circuit_and_learns_info() {
    let bus = MockBus::new();
    let scheduler = scheduler("init");
    let sensor = plain_sensor(&bus, &scheduler);
    sensor.init_with(true).unwrap();
    assert!(wait_until(|| sensor.is_idle()));

    assert_eq!(
        bus.writes_to(PLAIN_ADDRESS),
        ["i", "status", "cal,?", "l,0", "plock,1"]
    );
    assert_eq!(sensor.firmware_version(), FirmwareVersion::new(2, 10));
    assert_eq!(sensor.device_type().as_deref(), Some("pH"));
    assert!(bus.is_registered(PLAIN_ADDRESS));
    assert_eq!(sensor.init(), Err(Error::AlreadyExists));

    // The scheduler may still hold the driver for a moment after idling.
    drop(sensor);
    assert!(wait_until(|| !bus.is_registered(PLAIN_ADDRESS)));
    scheduler.shutdown();
}

#[test]
fn commands_before_init_fail() {
    let bus = MockBus::new();
    let scheduler = scheduler("no-init");
    let sensor = plain_sensor(&bus, &scheduler);
    assert_eq!(sensor.send_find(false, None), Err(Error::Io));
    assert!(bus.writes_to(PLAIN_ADDRESS).is_empty());
    scheduler.shutdown();
}

#[test]
fn priority_order_import_default_read() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "priority");

    let read = sensor
        .command("r", ResponseBody::Raw, 5)
        .unwrap()
        .with_priority(Priority::READ);
    let import = sensor
        .command("import,abc", ResponseBody::Raw, 5)
        .unwrap()
        .with_priority(Priority::IMPORT);
    let default = sensor.command("find", ResponseBody::Raw, 5).unwrap();

    sensor.enqueue(read);
    sensor.enqueue(import);
    sensor.submit(default, false).unwrap();

    assert!(wait_until(|| sensor.is_idle()));
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["import,abc", "find", "r"]);
    scheduler.shutdown();
}

#[test]
fn equal_priorities_keep_arrival_order() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "fifo");

    for text in ["l,1", "l,0"] {
        sensor.enqueue(sensor.command(text, ResponseBody::Raw, 5).unwrap());
    }
    sensor
        .submit(sensor.command("find", ResponseBody::Raw, 5).unwrap(), true)
        .unwrap();

    assert!(wait_until(|| sensor.is_idle()));
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["l,1", "l,0", "find"]);
    scheduler.shutdown();
}

#[test]
fn reading_loop_perpetuates_without_duplicates() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "loop");
    let observer = Arc::new(CountingObserver::default());
    sensor
        .add_observer(Arc::clone(&observer) as Arc<dyn ReadingObserver>)
        .unwrap();

    sensor.enqueue_send_get_reading().unwrap();
    sensor.enqueue_send_get_reading().unwrap();
    assert!(sensor.is_reading_active());

    for _ in 0..20 {
        assert!(sensor.pending_commands() <= 1);
        std::thread::sleep(std::time::Duration::from_millis(3));
    }
    assert!(wait_until(|| observer.count() >= 3));
    assert_eq!(sensor.last_value(), Some(7.0));

    // A failed cycle does not end the loop.
    bus.script(PLAIN_ADDRESS, [syntax_error()]);
    let before = observer.count();
    assert!(wait_until(|| observer.count() >= before + 3));

    sensor.stop();
    scheduler.shutdown();
}

#[test]
fn forced_value_replaces_last_reading_only() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "forced");
    let observer = Arc::new(CountingObserver::default());
    sensor
        .add_observer(Arc::clone(&observer) as Arc<dyn ReadingObserver>)
        .unwrap();
    sensor.set_forced_value(Some(4.2));

    sensor.send_get_reading(true, None).unwrap();
    assert_eq!(sensor.last_value(), Some(4.2));
    // Observers see the measurement, not the override.
    assert_eq!(observer.count(), 1);
    let published = *observer.last.lock();
    assert_eq!(published.map(|m| m.value), Some(7.0));

    sensor.set_forced_value(None);
    sensor.send_get_reading(true, None).unwrap();
    assert_eq!(sensor.last_value(), Some(7.0));
    scheduler.shutdown();
}

#[test]
fn export_of_five_strings_calls_back_once() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "export");

    let chunks = ["AAAAAAAAAAAA", "BBBBBBBBBBBB", "CCCCCCCCCCCC", "DDDDDDDDDDDD", "EEEE"];
    bus.script(PLAIN_ADDRESS, [success_frame("?EXPORT,5,52")]);
    bus.script(PLAIN_ADDRESS, chunks.iter().map(|c| success_frame(c)));
    bus.script(PLAIN_ADDRESS, [success_frame("*DONE")]);

    let calls = Arc::new(AtomicUsize::new(0));
    let exported = Arc::new(Mutex::new(Vec::new()));
    let (c, e) = (Arc::clone(&calls), Arc::clone(&exported));
    sensor
        .send_export(
            true,
            Some(Box::new(move |_: &AtlasSensor, response: &Response| {
                c.fetch_add(1, Ordering::SeqCst);
                if let Some(export) = response.export() {
                    e.lock().extend(export.strings.iter().map(|s| s.as_str().to_owned()));
                }
            })),
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*exported.lock(), chunks);
    let writes = bus.writes_to(PLAIN_ADDRESS);
    assert_eq!(writes[0], "export,?");
    assert_eq!(writes.len(), 7);
    assert!(writes[1..].iter().all(|w| w == "export"));
    scheduler.shutdown();
}

#[test]
fn import_sends_each_string_then_completes() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "import");

    let progress = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&progress);
    sensor
        .send_import(
            &["one", "two", "three"],
            true,
            Some(Box::new(move |_: &AtlasSensor, response: &Response| {
                p.lock()
                    .push((response.is_ok(), response.import().map(|i| (i.sent, i.total))));
            })),
        )
        .unwrap();

    assert_eq!(*progress.lock(), [(true, Some((3, 3)))]);
    assert_eq!(
        bus.writes_to(PLAIN_ADDRESS),
        ["import,one", "import,two", "import,three"]
    );
    assert_eq!(sensor.send_import(&[], false, None), Err(Error::InvalidArgument));
    scheduler.shutdown();
}

#[test]
fn still_processing_retries_without_callback() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "busy");

    bus.script(
        PLAIN_ADDRESS,
        [still_processing(), still_processing(), success_frame("?CAL,2")],
    );
    let reads_before = bus.reads();
    let points = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&points);
    sensor
        .send_get_calibration(
            true,
            Some(Box::new(move |_: &AtlasSensor, response: &Response| {
                p.lock().push(response.as_int());
            })),
        )
        .unwrap();

    assert_eq!(*points.lock(), [Some(2)]);
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["cal,?"]);
    assert_eq!(bus.reads() - reads_before, 3);
    scheduler.shutdown();
}

#[test]
fn status_bytes_surface_as_errors() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "status");

    bus.script(PLAIN_ADDRESS, [syntax_error()]);
    assert_eq!(sensor.send_find(true, None), Err(Error::InvalidArgument));

    bus.script(PLAIN_ADDRESS, [ezoctl::ezo::encode_frame(255, "")]);
    assert_eq!(sensor.send_find(true, None), Err(Error::NoData));

    bus.script(PLAIN_ADDRESS, [ezoctl::ezo::encode_frame(7, "7.0")]);
    assert_eq!(sensor.send_find(true, None), Err(Error::MalformedMessage));

    // Echo prefix mismatch.
    bus.script(PLAIN_ADDRESS, [success_frame("?X,1")]);
    assert_eq!(sensor.send_get_led(true, None), Err(Error::MalformedMessage));

    // The queue keeps working afterwards.
    assert_eq!(sensor.send_find(true, None), Ok(()));
    scheduler.shutdown();
}

#[test]
fn write_failure_completes_immediately() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "write-fail");

    bus.set_fail_writes(true);
    let reads_before = bus.reads();
    assert_eq!(sensor.send_get_status(true, None), Err(Error::Io));
    assert_eq!(bus.reads(), reads_before);

    bus.set_fail_writes(false);
    assert_eq!(sensor.send_get_status(true, None), Ok(()));
    scheduler.shutdown();
}

#[test]
fn read_timeout_surfaces_and_driver_recovers() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "read-timeout");

    bus.set_fail_reads(Some(Error::Timeout));
    assert_eq!(sensor.send_get_status(true, None), Err(Error::Timeout));

    bus.set_fail_reads(None);
    assert_eq!(sensor.send_get_status(true, None), Ok(()));
    scheduler.shutdown();
}

#[test]
fn concurrent_callers_never_overlap_transfers() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 6;

    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "concurrent");
    let completions = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let sensor = Arc::clone(&sensor);
            let completions = Arc::clone(&completions);
            std::thread::spawn(move || {
                for n in 0..PER_THREAD {
                    let c = Arc::clone(&completions);
                    let command = sensor
                        .command(format!("l,{}", (worker + n) % 2), ResponseBody::Raw, 1)
                        .unwrap()
                        .on_complete(Box::new(move |_: &AtlasSensor, _: &Response| {
                            c.fetch_add(1, Ordering::SeqCst);
                        }));
                    // Alternate blocking and fire-and-forget submits.
                    sensor.submit(command, n % 2 == 0).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(wait_until(|| sensor.is_idle()));
    assert_eq!(completions.load(Ordering::SeqCst), THREADS * PER_THREAD);
    assert_eq!(bus.writes_to(PLAIN_ADDRESS).len(), THREADS * PER_THREAD);
    assert_eq!(bus.overlapping_writes(), 0);
    scheduler.shutdown();
}

#[test]
fn commands_without_response_skip_the_read() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "no-reply");

    let reads_before = bus.reads();
    sensor.send_sleep(true, None).unwrap();
    sensor.send_factory_reset(true, None).unwrap();
    sensor.send_baud(ezoctl::ezo::Baud::B9600, true, None).unwrap();
    sensor.send_set_i2c_address(0x65, true, None).unwrap();
    assert_eq!(bus.reads(), reads_before);
    assert_eq!(
        bus.writes_to(PLAIN_ADDRESS),
        ["sleep", "factory", "baud,9600", "i2c,101"]
    );
    scheduler.shutdown();
}

#[test]
fn argument_validation_happens_before_queueing() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "args");

    assert_eq!(sensor.send_set_i2c_address(0, false, None), Err(Error::OutOfRange));
    assert_eq!(sensor.send_set_i2c_address(128, false, None), Err(Error::OutOfRange));
    assert_eq!(sensor.send_set_name("", false, None), Err(Error::InvalidArgument));
    assert_eq!(
        sensor.send_set_name("seventeen-chars-x", false, None),
        Err(Error::InvalidArgument)
    );
    sensor.send_set_name("tank1", true, None).unwrap();
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["name,tank1"]);
    scheduler.shutdown();
}

#[test]
fn synchronous_send_from_callback_is_rejected() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "reentrant");

    let inner = Arc::new(Mutex::new(None));
    let i = Arc::clone(&inner);
    sensor
        .send_find(
            true,
            Some(Box::new(move |sensor: &AtlasSensor, _: &Response| {
                *i.lock() = Some(sensor.send_get_led(true, None));
            })),
        )
        .unwrap();

    assert_eq!(*inner.lock(), Some(Err(Error::InvalidArgument)));
    scheduler.shutdown();
}

#[test]
fn asynchronous_send_from_callback_is_queued() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "chained");

    sensor
        .send_find(
            false,
            Some(Box::new(|sensor: &AtlasSensor, _: &Response| {
                sensor.send_get_led(false, None).unwrap();
            })),
        )
        .unwrap();

    assert!(wait_until(|| bus.writes_to(PLAIN_ADDRESS).len() == 2 && sensor.is_idle()));
    assert_eq!(bus.writes_to(PLAIN_ADDRESS), ["find", "l,?"]);
    scheduler.shutdown();
}

#[test]
fn reenqueue_command_resets_between_cycles() {
    let bus = MockBus::new();
    let (scheduler, sensor) = ready_sensor(&bus, "reenqueue");

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&statuses);
    let command = sensor
        .command("status", ResponseBody::status(), 5)
        .unwrap()
        .with_prefix("?status,")
        .with_behavior(CompletionBehavior::Reenqueue)
        .with_priority(Priority::READ)
        .on_complete(Box::new(move |_: &AtlasSensor, response: &Response| {
            s.lock().push(response.status());
        }));

    bus.script(PLAIN_ADDRESS, [syntax_error()]);
    sensor.submit(command, false).unwrap();

    assert!(wait_until(|| statuses.lock().len() >= 3));
    let seen = statuses.lock().clone();
    assert_eq!(seen[0], Err(Error::InvalidArgument));
    assert!(seen[1..].iter().all(Result::is_ok));
    assert!(sensor.pending_commands() <= 1);

    sensor.stop();
    scheduler.shutdown();
}
