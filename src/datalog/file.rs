use std::{
    io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use futures_util::{StreamExt, future, stream, stream::BoxStream};
use jiff::{Zoned, civil::Date};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::record::{Sample, encode_sample};

const DATE_FORMAT: &str = "%Y_%m_%d";

/// Per-day append-only record logs under `<data_dir>/logs`.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

/// Parses a `YYYY_MM_DD` log date. Anything else, including impossible dates, is `None`.
pub fn parse_date(s: &str) -> Option<Date> {
    let date = Date::strptime(DATE_FORMAT, s).ok()?;
    // strptime tolerates unpadded fields, file names do not
    (date.strftime(DATE_FORMAT).to_string() == s).then_some(date)
}

pub fn format_date(date: Date) -> String {
    date.strftime(DATE_FORMAT).to_string()
}

impl LogStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("logs"),
        }
    }

    /// Log file for `date`, or for today if `date` is missing or not a valid date.
    pub fn path(&self, date: Option<&str>) -> PathBuf {
        let date = date
            .and_then(parse_date)
            .unwrap_or_else(|| Zoned::now().date());
        self.dir.join(format!("{}.log", format_date(date)))
    }

    /// Appends one record for `sample` to today's log in a single write.
    pub async fn append(&self, sample: &Sample, timestamp: u64) -> io::Result<()> {
        let record = encode_sample(sample, timestamp);
        let path = self.path(None);
        fs::create_dir_all(&self.dir).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&record).await?;
        file.flush().await?;

        debug!("appended record to {}", path.display());
        Ok(())
    }

    /// Truncates the log for `date` to nothing.
    pub async fn purge(&self, date: Option<&str>) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::File::create(self.path(date)).await?;
        Ok(())
    }

    /// Streams the raw bytes of the log for `date`.
    pub async fn open(&self, date: Option<&str>) -> BoxStream<'static, io::Result<Bytes>> {
        open_path(&self.path(date)).await
    }
}

/// Streams the raw bytes of any log file. A file that cannot be opened
/// yields its open error as the only item.
pub async fn open_path(path: &Path) -> BoxStream<'static, io::Result<Bytes>> {
    match fs::File::open(path).await {
        Ok(file) => ReaderStream::new(file).boxed(),
        Err(e) => {
            debug!("opening {}: {e}", path.display());
            stream::once(future::ready(Err(e))).boxed()
        }
    }
}
