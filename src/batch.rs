use std::io::Read;

use tracing::debug;

use crate::{
    client::UpdateClient,
    config::BatchConfig,
    device::DeviceReader,
    dispatch::{BatchSummary, Dispatcher},
    error::BatchError,
    payload::UpdatePayload,
};

/// Updates every device listed in `input` with the applications in `config`.
///
/// Configuration problems, such as a zero worker count or a missing device
/// column, are reported before any request is sent.
pub async fn run_batch<R>(config: BatchConfig, input: R) -> Result<BatchSummary, BatchError>
where
    R: Read + Send + 'static,
{
    let client = UpdateClient::new(config.endpoint)?;
    let dispatcher = Dispatcher::new(client, config.workers)?;

    let payload = UpdatePayload::build(&config.apps)?;
    debug!("Updating devices with:\n{payload}");

    let devices = DeviceReader::new(input)?;
    dispatcher.run(devices, payload).await
}
