use anyhow::{bail, Context};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "invoker.toml";
pub const DEFAULT_URL: &str = "http://localhost:31112/function/qrcode-go";
pub const DEFAULT_LOG_PATH: &str = "./log.csv";
pub const DEFAULT_PAYLOAD: &str = "aaaLorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. Sagittis aliquam malesuada bibendum arcu vitae elementum curabitur. Ultrices neque ornare aenean euismod elementum nisi quis. Quis vel eros donec ac. Pretium viverra suspendisse potenti nullam ac. Scelerisque eleifend donec pretium vulputate sapien nec. Feugiat pretium nibh ipsum consequat nisl vel pretium lectus quam. Malesuada bibendum arcu vitae elementum curabitur vitae nunc sed. Neque sodales ut etiam sit amet nisl purus in mollis. Arcu dictum varius duis at consectetur lorem donec massa. Ut tristique et egestas quis ipsum suspendisse ultrices. Ac turpis egestas maecenas pharetra. Commodo elit at imperdiet dui accumsan sit. Tincidunt arcu non sodales neque sodales ut etiam. Vulputate eu scelerisque felis imperdiet proin.aaaLorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. Sagittis aliquam malesuada bibendum arcu vitae elementum curabitur. Ultrices neque ornare aenean euismod elementum nisi quis. Quis vel eros donec ac. Pretium viverra suspendisse potenti nullam ac. Scelerisque eleifend donec pretium vulputate sapien nec. Feugiat pretium nibh ipsum consequat nisl vel pretium lectus quam. Malesuada bibendum arcu vitae elementum curabitur vitae nunc sed. Neque sodales ut etiam sit amet nisl purus in mollis. Arcu dictum varius duis at consectetur lorem donec massa. Ut tristique et egestas quis ipsum suspendisse ultrices. Ac turpis egestas maecenas pharetra. Commodo elit at imperdiet dui accumsan sit. Tincidunt arcu non sodales neque sodales ut etiam. Vulputate eu scelerisque felis imperdiet proin.aaaLorem ips";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub period_secs: u64,
    /// How long shutdown waits for running batches before aborting them.
    pub grace_secs: u64,
    pub overlap: OverlapPolicy,
    pub target: Target,
    pub invocation: InvocationRange,
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period_secs: 60,
            grace_secs: 30,
            overlap: OverlapPolicy::default(),
            target: Target::default(),
            invocation: InvocationRange::default(),
            log: Log::default(),
        }
    }
}

impl Config {
    /// Loads the config from `path`, or from [`DEFAULT_CONFIG_PATH`] when no
    /// path is given. Only the default path is allowed to be missing.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_path(path).await,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if tokio::fs::try_exists(path).await? {
                    Self::from_path(path).await
                } else {
                    tracing::info!("{} not found, using defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }

    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let conf = Self::from_toml(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(conf)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let conf = toml::from_str::<Config>(text)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.period_secs == 0 {
            bail!("period_secs must be greater than 0");
        }
        if self.invocation.min > self.invocation.max {
            bail!(
                "invocation.min ({}) is greater than invocation.max ({})",
                self.invocation.min,
                self.invocation.max
            );
        }
        reqwest::Url::parse(&self.target.url)
            .with_context(|| format!("target.url {:?} is not a valid url", self.target.url))?;
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// What to do when a tick fires while the previous batch is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum OverlapPolicy {
    #[default]
    #[serde(rename = "skip")]
    Skip,
    #[serde(rename = "allow")]
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Target {
    pub url: String,
    pub payload: String,
    pub timeout_secs: Option<u64>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            payload: DEFAULT_PAYLOAD.into(),
            timeout_secs: None,
        }
    }
}

impl Target {
    /// Last non-empty path segment of the url, e.g. `qrcode-go`.
    pub fn function_name(&self) -> &str {
        self.url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.url)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Inclusive bounds on invocations per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InvocationRange {
    pub min: u32,
    pub max: u32,
}

impl Default for InvocationRange {
    fn default() -> Self {
        Self::new(1, 9)
    }
}

impl InvocationRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, n: u32) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Log {
    pub path: PathBuf,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_PATH),
        }
    }
}
