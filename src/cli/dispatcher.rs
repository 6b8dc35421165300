use std::{io, pin::pin};

use bytes::Bytes;
use futures_util::{StreamExt, stream::BoxStream};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::{
    api,
    config::SolarLinkConfig,
    datalog::{LogStore, Record, file::open_path, json_array, records},
    poller,
    state::SolarLinkState,
};

use super::{
    error::DispatchError,
    model::{Cli, CliCommands},
};

impl Cli {
    pub async fn dispatch(self) -> Result<(), DispatchError> {
        let cfg = SolarLinkConfig::load(self.config.as_deref())?;

        match self.command.unwrap_or(CliCommands::Serve) {
            CliCommands::Serve => serve(cfg).await,
            CliCommands::Dump(args) => {
                let source = match args.file {
                    Some(path) => open_path(&path).await,
                    None => LogStore::new(&cfg.data_dir).open(args.date.as_deref()).await,
                };
                let mut stdout = tokio::io::stdout();
                write_json(source, &mut stdout).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
                Ok(())
            }
            CliCommands::Purge(args) => {
                let logs = LogStore::new(&cfg.data_dir);
                logs.purge(args.date.as_deref()).await?;
                info!("purged {}", logs.path(args.date.as_deref()).display());
                Ok(())
            }
        }
    }
}

async fn serve(cfg: SolarLinkConfig) -> Result<(), DispatchError> {
    let state = SolarLinkState::init(cfg).await?;
    let poller = poller::spawn(state.clone());

    tokio::select! {
        res = api::init(state) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    poller.abort();
    Ok(())
}

/// Writes a raw log as a JSON array of records.
pub async fn write_json<W>(
    source: BoxStream<'static, io::Result<Bytes>>,
    out: &mut W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frames = pin!(json_array(records::<Record, _>(source)));
    while let Some(Ok(frame)) = frames.next().await {
        out.write_all(frame.as_bytes()).await?;
    }
    Ok(())
}
