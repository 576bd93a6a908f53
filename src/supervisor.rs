use std::{net::IpAddr, path::PathBuf};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    app_log::{run_rotator, AppLog},
    config::{ChannelConfig, RotationPolicy},
    error::SupervisorError,
    listener::udp::run_udp_listener,
};

/// Runs every configured channel plus the log rotator and decides when the
/// process is done.
pub struct Supervisor {
    pub data_root: PathBuf,
    pub bind_address: IpAddr,
    pub app_log: AppLog,
    pub rotation: RotationPolicy,
    pub shutdown_token: CancellationToken,
}

impl Supervisor {
    /// Returns once every channel has stopped, either after shutdown or
    /// because each one failed on its own. A failing log rotation stops all
    /// channels and is returned as an error.
    pub async fn run(self, channels: Vec<ChannelConfig>) -> Result<(), SupervisorError> {
        let mut workers = JoinSet::new();
        for channel in channels {
            let span = info_span!("channel", port = channel.port, stream = %channel.stream_name);
            info!(port = channel.port, stream = %channel.stream_name, "starting channel");
            workers.spawn(
                run_udp_listener(
                    channel,
                    self.bind_address,
                    self.data_root.clone(),
                    self.shutdown_token.child_token(),
                )
                .instrument(span),
            );
        }
        if workers.is_empty() {
            warn!("no usable channels configured, nothing to record");
            return Ok(());
        }
        info!(channels = workers.len(), "all channels started");

        let rotator_token = self.shutdown_token.child_token();
        let mut rotator = tokio::task::spawn(run_rotator(
            self.app_log.clone(),
            self.rotation,
            rotator_token.clone(),
        ));
        let mut rotator_done = false;
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(error = %e, "channel stopped"),
                        Err(e) => error!(error = %e, "channel task failed"),
                    }
                },
                rotated = &mut rotator, if !rotator_done => {
                    rotator_done = true;
                    match rotated {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!(error = %e, "operational log rotation failed, stopping");
                            self.shutdown_token.cancel();
                            outcome = Err(e.into());
                        }
                        Err(e) => error!(error = %e, "log rotation task failed"),
                    }
                }
            }
        }

        rotator_token.cancel();
        if !rotator_done {
            _ = rotator.await;
        }
        outcome
    }
}
