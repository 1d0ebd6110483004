use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::{sync::Notify, task::JoinHandle};

use crate::{downloader::throttle::ThrottleState, util::CancelToken};

/// Tuning for the scaling loop.
///
/// The cooldowns keep the pool from oscillating: growing is cheap so it may
/// happen every 3 s, shrinking discards a warm connection so it waits 6 s.
/// A tick only counts as improvement above `plateau_ratio`; four flat ticks
/// in a row read as saturation. `surge_ratio` gates growth to ticks where
/// throughput is still climbing steeply, not merely drifting upward.
#[derive(Clone, Debug)]
pub struct AutoScalerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub tick: Duration,
    pub up_cooldown: Duration,
    pub down_cooldown: Duration,
    pub plateau_ticks: u32,
    pub plateau_ratio: f64,
    pub surge_ratio: f64,
}

impl AutoScalerConfig {
    pub fn for_max_workers(max_workers: usize) -> Self {
        Self {
            min_workers: 1,
            max_workers: max_workers.max(1),
            tick: Duration::from_millis(1500),
            up_cooldown: Duration::from_secs(3),
            down_cooldown: Duration::from_secs(6),
            plateau_ticks: 4,
            plateau_ratio: 1.02,
            surge_ratio: 1.10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScaleAction {
    Up,
    Down,
    Hold,
}

#[derive(Debug)]
struct ScalerState {
    current: usize,
    last_rate: f64,
    no_improve_ticks: u32,
    last_up: Option<Instant>,
    last_down: Option<Instant>,
}

/// Feedback loop sizing the download worker pool from observed throughput
/// and hard-error back-pressure.
///
/// A single background observer ticks every 1.5 s; `spawn_one` starts a
/// worker, `kill_one` enqueues a shutdown sentinel that retires whichever
/// worker pops it next. Workers are fungible.
#[derive(Debug)]
pub struct AutoScaler {
    config: AutoScalerConfig,
    throttle: Arc<ThrottleState>,
    state: Mutex<ScalerState>,
    stop: CancelToken,
    stopped: Notify,
}

impl AutoScaler {
    pub fn new(config: AutoScalerConfig, throttle: Arc<ThrottleState>) -> Self {
        let current = config.min_workers;
        Self {
            config,
            throttle,
            state: Mutex::new(ScalerState {
                current,
                last_rate: 0.0,
                no_improve_ticks: 0,
                last_up: None,
                last_down: None,
            }),
            stop: CancelToken::new(),
            stopped: Notify::new(),
        }
    }

    pub fn config(&self) -> &AutoScalerConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.state.lock().expect("scaler lock poisoned").current
    }

    pub fn stop(&self) {
        self.stop.cancel();
        self.stopped.notify_waiters();
    }

    pub fn start(
        self: &Arc<Self>,
        spawn_one: impl Fn() + Send + Sync + 'static,
        kill_one: impl Fn() + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let scaler = self.clone();
        tokio::spawn(async move {
            tracing::info!("autoscaler loop started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(scaler.config.tick) => {}
                    _ = scaler.stopped.notified() => break,
                }
                if scaler.stop.is_cancelled() {
                    break;
                }

                let rate = scaler.throttle.download_rate();
                let hard_errors = scaler.throttle.error_rate();

                match scaler.observe(rate, hard_errors, Instant::now()) {
                    ScaleAction::Up => {
                        tracing::info!(workers = scaler.worker_count(), "scaled up");
                        spawn_one();
                    }
                    ScaleAction::Down => {
                        tracing::warn!(workers = scaler.worker_count(), "scaled down");
                        kill_one();
                    }
                    ScaleAction::Hold => {}
                }
            }
            tracing::info!("autoscaler loop exited");
        })
    }

    /// One observation step. First match in the ladder wins; shrinking
    /// beats growing.
    pub(crate) fn observe(&self, rate: f64, hard_errors: usize, now: Instant) -> ScaleAction {
        let config = &self.config;
        let mut state = self.state.lock().expect("scaler lock poisoned");

        let can_up = state
            .last_up
            .is_none_or(|at| now.duration_since(at) >= config.up_cooldown);
        let can_down = state
            .last_down
            .is_none_or(|at| now.duration_since(at) >= config.down_cooldown);

        // 1. Hard throttling from the host.
        if hard_errors > 0 {
            tracing::warn!(hard_errors, "hard throttling observed");
            state.last_rate = rate;
            if can_down && state.current > config.min_workers {
                state.current -= 1;
                state.last_down = Some(now);
                return ScaleAction::Down;
            }
            return ScaleAction::Hold;
        }

        // 2. Throughput trend.
        if rate <= state.last_rate * config.plateau_ratio {
            state.no_improve_ticks += 1;
        } else {
            state.no_improve_ticks = 0;
        }

        if state.no_improve_ticks >= config.plateau_ticks && state.current > config.min_workers {
            tracing::debug!(rate, last_rate = state.last_rate, "throughput plateau");
            state.last_rate = rate;
            if can_down {
                state.current -= 1;
                state.last_down = Some(now);
                return ScaleAction::Down;
            }
            return ScaleAction::Hold;
        }

        // 3. Still climbing steeply and there is headroom.
        if can_up && rate > state.last_rate * config.surge_ratio && state.current < config.max_workers
        {
            state.current += 1;
            state.last_up = Some(now);
            state.last_rate = rate;
            return ScaleAction::Up;
        }

        state.last_rate = rate;
        ScaleAction::Hold
    }
}
