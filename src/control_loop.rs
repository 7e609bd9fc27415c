//! The fan control loop.
//!
//! Every cycle the hottest valid temperature is smoothed, mapped to a duty
//! tier, passed through the hysteresis gate, the dwell guard and the rate
//! limiter, and finally written to the fan. When no sensor yields a valid
//! reading the loop drops into fail-safe and pins the fan at `max_duty`,
//! skipping every other stage.
//!
//! # Example
//!
//! ```no_run
//! use hwfand::{
//!     config::Config, control_loop::ControlLoop, drivers::pwm_sysfs::SysfsPwm,
//!     fan_controller::FanController, hwmon, temperature_sensors::hwmon_sensor::HwmonSensorSource,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let group = hwmon::find_group(&config.hwmon_root, &config.groups.fan).unwrap();
//! let fan = SysfsPwm::open(&group, config.groups.pwm_channel)?;
//! let initial = fan.read_duty().await?;
//! let sensor = HwmonSensorSource::new(&config, &group);
//!
//! ControlLoop::new(&config, Box::new(sensor), Box::new(fan), initial)
//!     .run(CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::{process, time::Duration};

use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::ControlError,
    event::{Event, EventBus},
    fan_controller::FanController,
    fan_curve::TierTable,
    limits::{dwell_elapsed, step_toward},
    sensors::{TemperatureSensor, aggregate},
    smoothing::EmaFilter,
    status::{Mode, StatusSnapshot},
};

/// Everything the loop carries from one cycle to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlState {
    /// Duty last written, or read back from the fan at startup.
    pub last_duty: u8,
    /// When `last_duty` was written; `None` until the first write.
    pub last_change: Option<Instant>,
    /// Smoothed temperature in millidegrees; `None` until the first valid reading.
    pub ema_value: Option<u32>,
    /// Whether the previous cycle ran in fail-safe.
    pub fail_safe: bool,
}

impl ControlState {
    pub fn new(initial_duty: u8) -> Self {
        Self {
            last_duty: initial_duty,
            last_change: None,
            ema_value: None,
            fail_safe: false,
        }
    }
}

/// Why a cycle left the duty untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    AtTarget,
    Hysteresis,
    Dwell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No valid reading; `max_duty` was written.
    FailSafe { duty: u8 },
    Applied { from: u8, to: u8, target: u8 },
    Held { duty: u8, target: u8, reason: HoldReason },
}

impl CycleOutcome {
    /// Duty in effect after the cycle.
    pub fn duty(&self) -> u8 {
        match *self {
            Self::FailSafe { duty } | Self::Held { duty, .. } => duty,
            Self::Applied { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    min_duty: u8,
    max_duty: u8,
    interval: Duration,
    hysteresis_margin: u32,
    min_dwell: Duration,
    max_step: u8,
}

pub struct ControlLoop {
    sensor: Box<dyn TemperatureSensor>,
    fan: Box<dyn FanController>,
    limits: Limits,
    tiers: TierTable,
    ema: EmaFilter,
    state: ControlState,
    events: Option<EventBus>,
}

impl ControlLoop {
    /// `initial_duty` is what the fan is running at right now.
    pub fn new(
        config: &Config,
        sensor: Box<dyn TemperatureSensor>,
        fan: Box<dyn FanController>,
        initial_duty: u8,
    ) -> Self {
        let c = &config.control;
        Self {
            sensor,
            fan,
            limits: Limits {
                min_duty: c.min_duty,
                max_duty: c.max_duty,
                interval: c.interval(),
                hysteresis_margin: c.hysteresis_margin,
                min_dwell: c.min_dwell(),
                max_step: c.max_step,
            },
            tiers: TierTable::from_config(config),
            ema: EmaFilter::new(c.ema_numerator, c.ema_denominator),
            state: ControlState::new(initial_duty),
            events: None,
        }
    }

    /// Publishes a [`StatusSnapshot`] on `events` after every cycle.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Runs cycles every `interval` until `cancel` fires. The first cycle
    /// runs immediately. Returns only on cancellation or a fatal error; the
    /// fan is left at whatever duty was last written.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ControlError> {
        let mut ticker = interval(self.limits.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Control loop started: duty {} in [{}, {}], every {:?}",
            self.state.last_duty, self.limits.min_duty, self.limits.max_duty, self.limits.interval
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Control loop stopped at duty {}", self.state.last_duty);
                    return Ok(());
                }
                now = ticker.tick() => {
                    self.cycle(now).await?;
                }
            }
        }
    }

    /// Runs one control cycle as of `now`.
    pub async fn cycle(&mut self, now: Instant) -> Result<CycleOutcome, ControlError> {
        let readings = self.sensor.read_all().await;

        let Some(hottest) = aggregate(&readings) else {
            let outcome = self.fail_safe(now).await?;
            self.publish(outcome, None).await;
            return Ok(outcome);
        };

        debug!(
            "Hottest {} at {}m°C, sampled {:?} into the cycle",
            hottest.source_id,
            hottest.millidegrees,
            hottest.taken_at.saturating_duration_since(now)
        );
        if self.state.fail_safe {
            info!("Valid temperature from {} again, leaving fail-safe", hottest.source_id);
            self.state.fail_safe = false;
        }

        let smoothed = self.ema.apply(self.state.ema_value, hottest.millidegrees);
        self.state.ema_value = Some(smoothed);
        let temp_c = smoothed / 1000;

        let outcome = self.regulate(temp_c, now).await?;
        match outcome {
            CycleOutcome::Applied { from, to, target } => info!(
                "Duty {from} -> {to} (target {target}, {temp_c}°C, hottest {} at {}m°C)",
                hottest.source_id, hottest.millidegrees
            ),
            CycleOutcome::Held { duty, target, reason } => {
                debug!("Duty held at {duty} ({reason:?}, target {target}, {temp_c}°C)")
            }
            CycleOutcome::FailSafe { .. } => {}
        }

        let source = hottest.source_id.clone();
        self.publish(outcome, Some(source)).await;
        Ok(outcome)
    }

    async fn regulate(&mut self, temp_c: u32, now: Instant) -> Result<CycleOutcome, ControlError> {
        let l = self.limits;
        let last = self.state.last_duty;
        let target = self.tiers.target_duty(temp_c);
        let held = |reason| CycleOutcome::Held {
            duty: last,
            target,
            reason,
        };

        // A duty outside the bounds, as read back at startup, is never held.
        let bounded = last.clamp(l.min_duty, l.max_duty);
        if bounded != last {
            warn!(
                "Duty {last} outside [{}, {}], moving to {bounded}",
                l.min_duty, l.max_duty
            );
            return self.apply(bounded, target, now).await;
        }

        if target == last {
            return Ok(held(HoldReason::AtTarget));
        }
        let permitted = self.tiers.gate(last, target, temp_c, l.hysteresis_margin);
        if permitted == last {
            return Ok(held(HoldReason::Hysteresis));
        }
        if !dwell_elapsed(self.state.last_change, now, l.min_dwell) {
            return Ok(held(HoldReason::Dwell));
        }

        let next = step_toward(last, permitted, l.max_step, l.min_duty, l.max_duty);
        if next == last {
            return Ok(held(HoldReason::AtTarget));
        }

        self.apply(next, target, now).await
    }

    async fn apply(
        &mut self,
        next: u8,
        target: u8,
        now: Instant,
    ) -> Result<CycleOutcome, ControlError> {
        let from = self.state.last_duty;
        self.fan.write_duty(next).await?;
        self.state.last_duty = next;
        self.state.last_change = Some(now);

        Ok(CycleOutcome::Applied {
            from,
            to: next,
            target,
        })
    }

    async fn fail_safe(&mut self, now: Instant) -> Result<CycleOutcome, ControlError> {
        let duty = self.limits.max_duty;
        if !self.state.fail_safe {
            warn!("No valid temperature reading, forcing duty {duty}");
            self.state.fail_safe = true;
        }

        self.fan.write_duty(duty).await?;
        self.state.last_duty = duty;
        self.state.last_change = Some(now);

        Ok(CycleOutcome::FailSafe { duty })
    }

    async fn publish(&self, outcome: CycleOutcome, hottest_source: Option<String>) {
        let Some(events) = &self.events else {
            return;
        };

        let (mode, target_duty) = match outcome {
            CycleOutcome::FailSafe { .. } => (Mode::FailSafe, None),
            CycleOutcome::Applied { target, .. } | CycleOutcome::Held { target, .. } => {
                (Mode::Running, Some(target))
            }
        };

        let snapshot = StatusSnapshot {
            pid: process::id(),
            mode,
            duty: outcome.duty(),
            target_duty,
            smoothed_millideg: self.state.ema_value,
            hottest_source,
            fan_rpm: self.fan.read_rpm().await,
            updated_at: StatusSnapshot::now_secs(),
        };

        if events.publish(Event::CycleCompleted(snapshot)).is_err() {
            debug!("No status subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fan_controller::MockFanController, sensors::Reading};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::{
        io,
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    /// Sensor returning whatever the test last set; `None` reads nothing.
    #[derive(Clone, Default)]
    struct ScriptedSensor {
        values: Arc<Mutex<Vec<u32>>>,
    }

    impl ScriptedSensor {
        fn set(&self, millidegrees: &[u32]) {
            *self.values.lock().unwrap() = millidegrees.to_vec();
        }
    }

    #[async_trait]
    impl TemperatureSensor for ScriptedSensor {
        async fn read_all(&self) -> Vec<Reading> {
            self.values
                .lock()
                .unwrap()
                .iter()
                .enumerate()
                .map(|(i, v)| Reading::new(format!("test@hwmon{i}:temp1"), *v))
                .collect()
        }
    }

    /// Fan recording every duty written.
    #[derive(Clone, Default)]
    struct RecordingFan {
        writes: Arc<Mutex<Vec<u8>>>,
    }

    impl RecordingFan {
        fn writes(&self) -> Vec<u8> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FanController for RecordingFan {
        async fn read_duty(&self) -> Result<u8, ControlError> {
            Ok(self.writes.lock().unwrap().last().copied().unwrap_or(0))
        }

        async fn write_duty(&self, duty: u8) -> Result<(), ControlError> {
            self.writes.lock().unwrap().push(duty);
            Ok(())
        }

        async fn read_rpm(&self) -> Option<u32> {
            Some(1500)
        }
    }

    fn harness(initial_duty: u8) -> (ControlLoop, ScriptedSensor, RecordingFan) {
        let sensor = ScriptedSensor::default();
        let fan = RecordingFan::default();
        let control = ControlLoop::new(
            &Config::default(),
            Box::new(sensor.clone()),
            Box::new(fan.clone()),
            initial_duty,
        );
        (control, sensor, fan)
    }

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    #[tokio::test]
    async fn first_reading_seeds_ema_exactly() {
        let (mut control, sensor, fan) = harness(76);
        sensor.set(&[35_000]);

        let outcome = control.cycle(Instant::now()).await.unwrap();

        assert_eq!(control.state().ema_value, Some(35_000));
        assert_eq!(
            outcome,
            CycleOutcome::Held { duty: 76, target: 76, reason: HoldReason::AtTarget }
        );
        assert!(fan.writes().is_empty());
    }

    #[tokio::test]
    async fn hottest_sensor_drives_the_fan() {
        let (mut control, sensor, fan) = harness(76);
        sensor.set(&[30_000, 250_000, 45_000, 2_000]);

        control.cycle(Instant::now()).await.unwrap();

        assert_eq!(control.state().ema_value, Some(45_000));
        assert_eq!(fan.writes(), vec![88]);
    }

    #[tokio::test]
    async fn rise_is_rate_limited_and_spaced_by_dwell() {
        let (mut control, sensor, fan) = harness(76);
        sensor.set(&[45_000]);
        let t0 = Instant::now();

        let mut outcomes = Vec::new();
        for s in (0..=25).step_by(5) {
            outcomes.push(control.cycle(secs(t0, s)).await.unwrap());
        }

        assert_eq!(fan.writes(), vec![88, 100, 110]);
        assert_eq!(outcomes[0], CycleOutcome::Applied { from: 76, to: 88, target: 110 });
        assert_eq!(
            outcomes[1],
            CycleOutcome::Held { duty: 88, target: 110, reason: HoldReason::Dwell }
        );
        assert_eq!(outcomes[2], CycleOutcome::Applied { from: 88, to: 100, target: 110 });
        assert_eq!(outcomes[4], CycleOutcome::Applied { from: 100, to: 110, target: 110 });
        assert_eq!(outcomes[5].duty(), 110);
    }

    #[tokio::test]
    async fn step_from_35_to_45_through_the_smoother() {
        let (mut control, sensor, fan) = harness(76);
        let t0 = Instant::now();
        sensor.set(&[35_000]);
        control.cycle(t0).await.unwrap();

        sensor.set(&[45_000]);
        let mut reasons = Vec::new();
        for s in (5..=50).step_by(5) {
            reasons.push(control.cycle(secs(t0, s)).await.unwrap());
        }

        use CycleOutcome::*;
        use HoldReason::*;
        assert_eq!(
            reasons,
            vec![
                Held { duty: 76, target: 76, reason: AtTarget },    // 37.500
                Held { duty: 76, target: 76, reason: AtTarget },    // 39.375
                Held { duty: 76, target: 110, reason: Hysteresis }, // 40.781
                Held { duty: 76, target: 110, reason: Hysteresis }, // 41.835
                Applied { from: 76, to: 88, target: 110 },          // 42.626
                Held { duty: 88, target: 110, reason: Dwell },
                Applied { from: 88, to: 100, target: 110 },
                Held { duty: 100, target: 110, reason: Dwell },
                Applied { from: 100, to: 110, target: 110 },
                Held { duty: 110, target: 110, reason: AtTarget },
            ]
        );
        assert_eq!(fan.writes(), vec![88, 100, 110]);
    }

    #[tokio::test]
    async fn hysteresis_holds_until_two_degrees_past_boundary() {
        let (mut control, sensor, fan) = harness(110);
        let t0 = Instant::now();
        sensor.set(&[51_000]);
        let outcome = control.cycle(t0).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Held { duty: 110, target: 150, reason: HoldReason::Hysteresis }
        );

        // Smoothed: 51.500, 51.875, 52.156
        sensor.set(&[53_000]);
        for s in [5, 10] {
            let outcome = control.cycle(secs(t0, s)).await.unwrap();
            assert_eq!(outcome.duty(), 110);
        }
        let outcome = control.cycle(secs(t0, 15)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Applied { from: 110, to: 122, target: 150 });
        assert_eq!(fan.writes(), vec![122]);
    }

    #[tokio::test]
    async fn oscillation_around_sixty_does_not_change_tier() {
        let (mut control, sensor, fan) = harness(150);
        let t0 = Instant::now();

        for (i, raw) in [58_000, 61_000].into_iter().cycle().take(40).enumerate() {
            sensor.set(&[raw]);
            let outcome = control.cycle(secs(t0, 5 * i as u64)).await.unwrap();
            assert_eq!(outcome.duty(), 150);
        }
        assert!(fan.writes().is_empty());
    }

    #[tokio::test]
    async fn missing_reading_forces_max_duty_despite_dwell() {
        let (mut control, sensor, fan) = harness(76);
        let t0 = Instant::now();
        sensor.set(&[45_000]);
        control.cycle(t0).await.unwrap();

        sensor.set(&[]);
        let outcome = control.cycle(secs(t0, 1)).await.unwrap();

        assert_eq!(outcome, CycleOutcome::FailSafe { duty: 255 });
        assert_eq!(fan.writes(), vec![88, 255]);
        assert!(control.state().fail_safe);
        assert_eq!(control.state().last_change, Some(secs(t0, 1)));
    }

    #[tokio::test]
    async fn out_of_range_readings_count_as_missing() {
        let (mut control, sensor, fan) = harness(110);
        sensor.set(&[0, 4_999, 110_001]);

        let outcome = control.cycle(Instant::now()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::FailSafe { duty: 255 });
        assert_eq!(control.state().ema_value, None);
        assert_eq!(fan.writes(), vec![255]);
    }

    #[tokio::test]
    async fn fail_safe_rewrites_every_cycle_and_recovers_gradually() {
        let (mut control, sensor, fan) = harness(110);
        let t0 = Instant::now();
        sensor.set(&[45_000]);
        control.cycle(t0).await.unwrap();

        sensor.set(&[]);
        control.cycle(secs(t0, 5)).await.unwrap();
        control.cycle(secs(t0, 10)).await.unwrap();
        assert_eq!(fan.writes(), vec![255, 255]);
        assert_eq!(control.state().ema_value, Some(45_000));

        sensor.set(&[45_000]);
        let outcome = control.cycle(secs(t0, 15)).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Held { duty: 255, target: 110, reason: HoldReason::Dwell }
        );
        assert!(!control.state().fail_safe);

        let outcome = control.cycle(secs(t0, 20)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Applied { from: 255, to: 243, target: 110 });
    }

    #[tokio::test]
    async fn startup_duty_below_min_is_lifted_into_bounds() {
        let (mut control, sensor, fan) = harness(0);
        sensor.set(&[30_000]);

        control.cycle(Instant::now()).await.unwrap();

        assert_eq!(fan.writes(), vec![76]);
    }

    #[tokio::test]
    async fn stopped_fan_near_boundary_is_not_held_by_hysteresis() {
        let (mut control, sensor, fan) = harness(0);
        sensor.set(&[41_000]);
        let t0 = Instant::now();

        let outcome = control.cycle(t0).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Applied { from: 0, to: 76, target: 110 });

        for s in (5..60).step_by(5) {
            let outcome = control.cycle(secs(t0, s)).await.unwrap();
            assert!((76..=255).contains(&outcome.duty()), "at {s}s: {outcome:?}");
        }
        assert_eq!(fan.writes(), vec![76]);
    }

    #[tokio::test]
    async fn startup_duty_above_max_is_pulled_down_at_once() {
        let mut config = Config::default();
        config.control.max_duty = 200;
        let sensor = ScriptedSensor::default();
        let fan = RecordingFan::default();
        let mut control =
            ControlLoop::new(&config, Box::new(sensor.clone()), Box::new(fan.clone()), 255);
        sensor.set(&[75_000]);
        let t0 = Instant::now();

        for s in (0..30).step_by(5) {
            control.cycle(secs(t0, s)).await.unwrap();
        }

        assert_eq!(fan.writes(), vec![200]);
        assert_eq!(control.state().last_duty, 200);
    }

    #[tokio::test]
    async fn write_failure_is_fatal() {
        let mut fan = MockFanController::new();
        fan.expect_write_duty().times(1).returning(|duty| {
            Err(ControlError::ActuatorWrite {
                duty,
                path: PathBuf::from("/sys/class/hwmon/hwmon0/pwm1"),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        });
        let sensor = ScriptedSensor::default();
        sensor.set(&[45_000]);
        let mut control =
            ControlLoop::new(&Config::default(), Box::new(sensor), Box::new(fan), 76);

        let err = control.cycle(Instant::now()).await.unwrap_err();

        assert!(matches!(err, ControlError::ActuatorWrite { duty: 88, .. }));
        assert_eq!(control.state().last_duty, 76);
        assert_eq!(control.state().last_change, None);
    }

    #[tokio::test]
    async fn cycle_publishes_status() {
        let (control, sensor, _fan) = harness(76);
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut control = control.with_events(events);
        sensor.set(&[45_000]);

        control.cycle(Instant::now()).await.unwrap();

        match rx.recv().await.unwrap() {
            Event::CycleCompleted(status) => {
                assert_eq!(status.mode, Mode::Running);
                assert_eq!(status.duty, 88);
                assert_eq!(status.target_duty, Some(110));
                assert_eq!(status.smoothed_millideg, Some(45_000));
                assert_eq!(status.hottest_source.as_deref(), Some("test@hwmon0:temp1"));
                assert_eq!(status.fan_rpm, Some(1500));
            }
            other => panic!("Expected CycleCompleted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_every_interval_until_cancelled() {
        let (control, sensor, fan) = harness(76);
        sensor.set(&[45_000]);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(control.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(22)).await;
        cancel.cancel();

        handle.await.unwrap().unwrap();
        // Cycles at 0, 5, 10, 15, 20; changes at 0, 10 and 20.
        assert_eq!(fan.writes(), vec![88, 100, 110]);
    }

    fn simulate(initial: u8, temps: &[Option<u32>]) -> Vec<(u64, CycleOutcome)> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (mut control, sensor, _fan) = harness(initial);
            let t0 = Instant::now();
            let mut history = Vec::new();
            for (i, temp) in temps.iter().enumerate() {
                match temp {
                    Some(t) => sensor.set(&[*t]),
                    None => sensor.set(&[]),
                }
                let at = 5 * i as u64;
                history.push((at, control.cycle(secs(t0, at)).await.unwrap()));
            }
            history
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn applied_changes_respect_bounds_step_and_dwell(
            initial in 0u8..=255,
            temps in prop::collection::vec(
                prop::option::weighted(0.9, 20_000u32..=90_000),
                1..80,
            ),
        ) {
            let history = simulate(initial, &temps);
            let mut last_write: Option<u64> = None;

            for (at, outcome) in history {
                prop_assert!((76..=255).contains(&outcome.duty()));
                match outcome {
                    CycleOutcome::Applied { from, to, .. } => {
                        if (76..=255).contains(&from) {
                            prop_assert!(from.abs_diff(to) <= 12);
                        }
                        if let Some(prev) = last_write {
                            prop_assert!(at - prev >= 10);
                        }
                        last_write = Some(at);
                    }
                    CycleOutcome::FailSafe { duty } => {
                        prop_assert_eq!(duty, 255);
                        last_write = Some(at);
                    }
                    CycleOutcome::Held { .. } => {}
                }
            }
        }
    }
}
