use std::{sync::Arc, time::Duration};

use anyhow::Result;
use heartbeat::HeartbeatEmitter;
use state::{AfkState, Sample, Tick};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    args::WatcherArgs,
    client::{
        aw::{default_port, AwClient, DEFAULT_HOST},
        queue::{queued, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_INTERVAL},
        EventSink,
    },
    config::{default_config_path, load_config, Settings},
    probe::{GenericLockProbe, LockProbe},
    shutdown,
    utils::{
        clock::{Clock, DefaultClock},
        dir::APPLICATION_NAME,
    },
};

pub mod heartbeat;
pub mod state;

/// Gives the server a moment before the first request.
const STARTUP_DELAY: Duration = Duration::from_secs(1);

/// Represents the starting point for the watcher
pub async fn start_watcher(args: WatcherArgs) -> Result<()> {
    let config_path = args.config.map_or_else(default_config_path, Ok)?;
    let section = load_config(&config_path, args.testing)?;
    let settings = Settings::new(&section, args.timeout, args.poll_time)?;
    info!("Using {settings:?}");

    let host = args.host.as_deref().unwrap_or(DEFAULT_HOST);
    let port = args.port.unwrap_or_else(|| default_port(args.testing));
    let client = Arc::new(AwClient::new(host, port, APPLICATION_NAME)?);
    let bucket_id = client.bucket_id();

    let probe = GenericLockProbe::new()?;
    let shutdown_token = CancellationToken::new();

    let (sink, dispatcher) = queued(
        client,
        DEFAULT_QUEUE_CAPACITY,
        shutdown_token.clone(),
        DEFAULT_RETRY_INTERVAL,
    );
    let emitter = HeartbeatEmitter::new(sink, bucket_id, settings.pulsetime());
    let watcher = LockWatcher::new(
        Box::new(probe),
        emitter,
        settings,
        Box::new(DefaultClock),
        shutdown_token.clone(),
    );

    let (_, watcher_result, dispatch_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        watcher.run(),
        dispatcher.run(),
    );

    if let Err(dispatch_result) = dispatch_result {
        error!("Delivery got an error {:?}", dispatch_result);
    }

    watcher_result
}

/// Samples the lock state every poll and reports it through the [HeartbeatEmitter].
pub struct LockWatcher<S> {
    probe: Box<dyn LockProbe>,
    emitter: HeartbeatEmitter<S>,
    settings: Settings,
    clock: Box<dyn Clock>,
    shutdown: CancellationToken,
    startup_delay: Duration,
}

impl<S: EventSink> LockWatcher<S> {
    pub fn new(
        probe: Box<dyn LockProbe>,
        emitter: HeartbeatEmitter<S>,
        settings: Settings,
        clock: Box<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            probe,
            emitter,
            settings,
            clock,
            shutdown,
            startup_delay: STARTUP_DELAY,
        }
    }

    async fn tick(&mut self, state: &mut AfkState) {
        let locked = self.probe.is_locked();
        let now = self.clock.time();
        debug!("at {now}: locked={locked}");

        let tick = state.observe(
            Sample {
                timestamp: now,
                locked,
            },
            self.settings.timeout,
        );
        match tick {
            Tick::BecameAfk(_) => info!("Became AFK"),
            Tick::BecameActive(_) => info!("No longer AFK"),
            Tick::StillAfk(_) | Tick::StillActive(_) => (),
        }

        for ping in tick.pings() {
            if let Err(e) = self.emitter.emit(ping).await {
                error!("Failed to send heartbeat {ping:?}: {e:?}");
            }
        }
    }

    /// Executes the watcher loop until shutdown is requested. Leaving the loop for any reason
    /// requests shutdown of the rest of the application.
    pub async fn run(mut self) -> Result<()> {
        let _shutdown_guard = self.shutdown.clone().drop_guard();
        info!("{APPLICATION_NAME} started for bucket {}", self.emitter.bucket_id());

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(()),
            _ = self.clock.sleep(self.startup_delay) => (),
        }

        self.emitter.create_bucket().await?;

        let mut state = AfkState::new(self.clock.time());
        let mut tick_point = self.clock.instant();
        loop {
            tick_point += self.settings.poll_time;

            self.tick(&mut state).await;

            // A probe slower than the poll interval shifts the schedule instead of bunching ticks.
            tick_point = tick_point.max(self.clock.instant());

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("{APPLICATION_NAME} stopped");
                    return Ok(())
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }
        }
    }
}
