//! Best-effort device metadata
//!
//! Sensors report hardware and firmware versions only on their HTML status
//! page. Anything that goes wrong while fetching or reading it yields empty
//! metadata.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, trace};

use crate::config::SensorConfig;

pub const METADATA_TIMEOUT: Duration = Duration::from_millis(1500);

const HARDWARE_VERSION: &str = "Hardware Version";
const FIRMWARE_VERSION: &str = "Firmware Version";

/// Opening tag of the first `.col-sm-6` element; group 1 is the tag name
static INFO_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<([a-z][a-z0-9]*)\b[^>]*\bclass\s*=\s*["'][^"']*\bcol-sm-6\b[^"']*["'][^>]*>"#)
        .expect("valid info block regex")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid line break regex"));

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Optional hardware/firmware strings of a sensor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub hardware_version: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceMetadata {
    pub fn is_empty(&self) -> bool {
        self.hardware_version.is_none() && self.firmware_version.is_none()
    }
}

/// Source of device metadata for a sensor
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Never fails; a miss is empty metadata.
    async fn fetch(&self, sensor: &SensorConfig) -> DeviceMetadata;
}

/// Reads the metadata from the sensor's status page
#[derive(Debug, Clone)]
pub struct StatusPageScraper {
    client: reqwest::Client,
}

impl StatusPageScraper {
    pub fn new() -> Result<Self> {
        Self::with_timeout(METADATA_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build metadata HTTP client")?;

        Ok(Self { client })
    }

    async fn status_page(&self, url: &str) -> Result<String> {
        self.client
            .get(url)
            .send()
            .await
            .context("failed to request status page")?
            .error_for_status()?
            .text()
            .await
            .context("failed to read status page")
    }
}

#[async_trait]
impl MetadataSource for StatusPageScraper {
    #[instrument(skip_all, fields(sensor = %sensor.name))]
    async fn fetch(&self, sensor: &SensorConfig) -> DeviceMetadata {
        match self.status_page(&sensor.root_url()).await {
            Ok(html) => {
                let metadata = parse_status_page(&html);
                trace!("status page metadata: {metadata:?}");
                metadata
            }
            Err(e) => {
                debug!("no device metadata: {e:#}");
                DeviceMetadata::default()
            }
        }
    }
}

/// Inner HTML of the first `.col-sm-6` element, nested elements included.
///
/// An element that is never closed extends to the end of the page.
fn info_block(html: &str) -> Option<&str> {
    let open = INFO_OPEN.captures(html)?;
    let start = open.get(0)?.end();
    let tag = open.get(1)?.as_str();

    let same_tag = Regex::new(&format!(r"(?i)<(/?){}\b[^>]*>", regex::escape(tag))).ok()?;
    let body = &html[start..];

    let mut depth = 1usize;
    for found in same_tag.captures_iter(body) {
        let whole = found.get(0)?;
        if found[1].is_empty() {
            if !whole.as_str().ends_with("/>") {
                depth += 1;
            }
        } else {
            depth -= 1;
            if depth == 0 {
                return Some(&body[..whole.start()]);
            }
        }
    }

    Some(body)
}

/// Extract the version lines from the info block of a status page.
pub fn parse_status_page(html: &str) -> DeviceMetadata {
    let Some(block) = info_block(html) else {
        return DeviceMetadata::default();
    };

    let mut metadata = DeviceMetadata::default();

    for line in LINE_BREAK.split(block) {
        let line = TAG.replace_all(line, "");
        if !line.contains("Version") {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim() {
            HARDWARE_VERSION => metadata.hardware_version = Some(value.to_string()),
            FIRMWARE_VERSION => metadata.firmware_version = Some(value.to_string()),
            _ => {}
        }
    }

    metadata
}
