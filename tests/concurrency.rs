use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use rcdrive::config::{ChannelId, VehicleConfig};
use rcdrive::engine::{ActuationEngine, EngineError};
use rcdrive::pwm::MockPwm;

fn engine() -> (Arc<ActuationEngine<MockPwm>>, MockPwm) {
    let mock = MockPwm::new();
    let table = VehicleConfig::default().channel_table().unwrap();
    (Arc::new(ActuationEngine::new(mock.clone(), table, 5)), mock)
}

fn wait_until(what: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !what() {
        assert!(Instant::now() < deadline, "condition never became true");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn opposing_motor_commands_settle_consistently() {
    for _ in 0..50 {
        let (engine, mock) = engine();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [50, -50]
            .into_iter()
            .map(|percent| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.set_motor(percent).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let fwd = mock.duty(ChannelId::MotorForward);
        let bwd = mock.duty(ChannelId::MotorBackward);
        match engine.motor_percent() {
            Some(50) => assert_eq!((fwd, bwd), (Some(4095), Some(0))),
            Some(-50) => assert_eq!((fwd, bwd), (Some(0), Some(4095))),
            other => panic!("unexpected motor state {:?}", other),
        }
        // each command releases one side and drives the other, never interleaved
        let writes = mock.writes();
        assert_eq!(writes.len(), 4);
        assert_ne!(writes[1].1, 0);
        assert_ne!(writes[3].1, 0);
        assert_ne!(writes[0].0, writes[1].0);
        assert_ne!(writes[2].0, writes[3].0);
    }
}

#[test]
fn many_writers_leave_cache_matching_hardware() {
    let (engine, mock) = engine();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..200 {
                    let angle = (i * 7 + t * 13) % 181;
                    engine.set_angle(angle).unwrap();
                    engine.set_motor((i % 201) - 100).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for channel in ChannelId::ALL {
        assert_eq!(engine.duty(channel), mock.duty(channel));
    }
    let angle = engine.angle().unwrap();
    assert_eq!(engine.duty(ChannelId::Steering), Some(engine.angle_duty(angle)));
}

#[test]
fn fade_completion_wakes_waiting_thread() {
    let (engine, mock) = engine();
    mock.hold_fades(true);

    let fading = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.fade_to(ChannelId::MotorForward, 3000, Duration::from_secs(1)))
    };
    wait_until(|| engine.is_busy(ChannelId::MotorForward));

    // instant writes never wait on a fading channel
    assert_eq!(engine.set_motor(30), Err(EngineError::ChannelBusy(ChannelId::MotorForward)));
    assert_eq!(
        engine.raw_duty_write(ChannelId::MotorForward, 10),
        Err(EngineError::ChannelBusy(ChannelId::MotorForward))
    );
    // other channels stay writable
    engine.set_angle(45).unwrap();

    assert_eq!(mock.complete_fades(), 1);
    fading.join().unwrap().unwrap();
    assert_eq!(engine.duty(ChannelId::MotorForward), Some(3000));
    assert_eq!(engine.motor_percent(), None);
    assert!(!engine.is_busy(ChannelId::MotorForward));
}

#[test]
fn second_fade_waits_for_the_first() {
    let (engine, mock) = engine();
    mock.hold_fades(true);

    let first = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.fade_to(ChannelId::Steering, 500, Duration::from_secs(1)))
    };
    wait_until(|| mock.pending_fades() == 1);

    let second = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.fade_to(ChannelId::Steering, 700, Duration::from_secs(1)))
    };
    thread::sleep(Duration::from_millis(20));
    // still only the first one in flight
    assert_eq!(mock.fades().len(), 1);

    mock.complete_fades();
    first.join().unwrap().unwrap();

    wait_until(|| mock.pending_fades() == 1);
    mock.complete_fades();
    second.join().unwrap().unwrap();

    assert_eq!(engine.duty(ChannelId::Steering), Some(700));
    let targets: Vec<u32> = mock.fades().iter().map(|f| f.duty).collect();
    assert_eq!(targets, vec![500, 700]);
}
