//! A data channel to a single IOTile.cloud source object.
//!
//! A source is a project (`p--`), device (`d--`) or datablock (`b--`). The channel lists and
//! counts the source's streams and downloads their events using the fetch operations of a
//! [CloudSession]. Devices also report hidden system streams and per-stream counts through
//! their `extra` record, which is used when counting and, on request, when listing streams.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::Display;

use crate::error::CloudError;
use crate::models::{Page, DEFAULT_PAGE_SIZE};
use crate::progress::{NoPostprocess, Postprocess, TracingProgress};
use crate::request::{query_args, QueryArgs, QueryValue};
use crate::session::CloudSession;
use crate::transport::Transport;

/// Page size used when downloading events.
pub const EVENT_PAGE_SIZE: usize = 1000;

/// Page size used when downloading data points.
pub const DATA_PAGE_SIZE: usize = 10000;

/// Kind of cloud object a channel reads from.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum SourceType {
    /// `p--` project
    Project,
    /// `d--` device
    Device,
    /// `b--` datablock (archive)
    DataBlock,
}

impl SourceType {
    /// Classify a cloud identifier by its prefix.
    pub fn classify(cloud_id: &str) -> Result<Self, CloudError> {
        if cloud_id.starts_with("p--") {
            Ok(Self::Project)
        } else if cloud_id.starts_with("d--") {
            Ok(Self::Device)
        } else if cloud_id.starts_with("b--") {
            Ok(Self::DataBlock)
        } else {
            Err(CloudError::UnsupportedSource {
                cloud_id: cloud_id.to_string(),
            })
        }
    }

    /// API resource holding objects of this type.
    fn resource(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Device => "device",
            Self::DataBlock => "datablock",
        }
    }

    /// Query argument selecting the streams of an object of this type.
    fn stream_filter(self, cloud_id: &str) -> QueryArgs {
        match self {
            Self::Project => query_args([("project", cloud_id)]),
            Self::Device => query_args([("device", cloud_id)]),
            Self::DataBlock => query_args([("block", cloud_id), ("all", "1")]),
        }
    }
}

/// Number of data points and events in a stream.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct StreamCounts {
    pub points: usize,
    pub events: usize,
}

/// Event metadata.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Event {
    /// Event id
    pub id: i64,
    /// Time of the event
    pub timestamp: String,
    /// Summary data stored with the event
    #[serde(default)]
    pub extra_data: Value,
    /// Whether a raw JSON payload is stored for the event
    #[serde(default)]
    pub has_raw_data: bool,
}

/// A single stream reading.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DataPoint {
    /// Time of the reading
    pub timestamp: String,
    /// Value of the reading
    #[serde(rename = "int_value")]
    pub value: f64,
}

/// Stream entry of a device's `extra` record.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct DeviceStreamInfo {
    /// `Some(false)` for hidden system streams, which have no stream record
    #[serde(default)]
    pub has_streamid: Option<bool>,
    #[serde(default)]
    pub data_cnt: usize,
    #[serde(default)]
    pub event_cnt: usize,
}

impl DeviceStreamInfo {
    /// Whether this is a hidden system stream.
    pub fn is_system(&self) -> bool {
        self.has_streamid == Some(false)
    }
}

#[derive(Debug, Deserialize)]
struct DeviceExtra {
    #[serde(default)]
    stream_counts: BTreeMap<String, DeviceStreamInfo>,
}

/// Raw payload of an event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawEvent {
    /// Time of the event
    pub timestamp: String,
    /// Raw payload, postprocessed
    pub data: Value,
}

/// Channel to a single cloud source object.
#[derive(Debug)]
pub struct CloudChannel<'a, T> {
    session: &'a CloudSession<T>,
    cloud_id: String,
    source_type: SourceType,
    include_system: bool,
}

impl<'a, T: Transport> CloudChannel<'a, T> {
    /// Return a new CloudChannel.
    ///
    /// # Arguments
    ///
    /// * `session`: Session used for all requests
    /// * `cloud_id`: Slug of a project, device or datablock
    pub fn new(session: &'a CloudSession<T>, cloud_id: &str) -> Result<Self, CloudError> {
        let source_type = SourceType::classify(cloud_id)?;
        Ok(Self {
            session,
            cloud_id: cloud_id.to_string(),
            source_type,
            include_system: false,
        })
    }

    /// Whether [list_streams](Self::list_streams) includes a device's hidden system streams.
    pub fn with_system_streams(mut self, include_system: bool) -> Self {
        self.include_system = include_system;
        self
    }

    /// Type of the source object.
    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    /// Fetch the record of the source object itself.
    pub async fn fetch_source_info(&self) -> Result<Value, CloudError> {
        let resource = format!("{}/{}/", self.source_type.resource(), self.cloud_id);
        self.session.fetch(&resource, &QueryArgs::new()).await
    }

    /// List the stream records of the source object.
    ///
    /// With system streams enabled on a device channel, each hidden system stream is appended as
    /// a record holding only its `slug`.
    pub async fn list_streams(&self) -> Result<Vec<Value>, CloudError> {
        let args = self.source_type.stream_filter(&self.cloud_id);
        let mut streams = self
            .session
            .fetch_all(
                "stream/",
                DEFAULT_PAGE_SIZE,
                &args,
                &TracingProgress::new("Listing Streams"),
            )
            .await?;
        if self.source_type == SourceType::Device && self.include_system {
            let table = self.fetch_device_streams().await?;
            streams.extend(
                table
                    .into_iter()
                    .filter(|(_, info)| info.is_system())
                    .map(|(slug, _)| json!({ "slug": slug })),
            );
        }
        Ok(streams)
    }

    /// Fetch the per-stream table of a device's `extra` record.
    async fn fetch_device_streams(
        &self,
    ) -> Result<BTreeMap<String, DeviceStreamInfo>, CloudError> {
        let resource = format!("device/{}/extra/", self.cloud_id);
        let payload = self.session.fetch(&resource, &QueryArgs::new()).await?;
        let extra: DeviceExtra = decode(&self.session.resource_url(&resource), payload)?;
        Ok(extra.stream_counts)
    }

    /// Fetch the properties of the source object as a name to value map.
    pub async fn fetch_properties(&self) -> Result<BTreeMap<String, Value>, CloudError> {
        let args = query_args([("target", self.cloud_id.as_str())]);
        let payload = self.session.fetch("property/", &args).await?;
        let url = self.session.resource_url("property/");
        let page = Page::from_payload(&url, payload)?;
        page.results
            .into_iter()
            .map(|item| -> Result<(String, Value), CloudError> {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CloudError::MissingField {
                        url: url.clone(),
                        field: "name",
                    })?;
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Ok((name.to_string(), value))
            })
            .collect()
    }

    /// Count the data points and events of several streams.
    ///
    /// Uses one request with a page size of 1 per stream and count, reading only the total
    /// record count from each. Hidden system streams of a device have no stream record, so their
    /// counts come from the device's `extra` record instead.
    pub async fn count_streams(
        &self,
        slugs: &[String],
    ) -> Result<BTreeMap<String, StreamCounts>, CloudError> {
        if self.source_type != SourceType::Device {
            return self.count_listed_streams(slugs).await;
        }
        let table = self.fetch_device_streams().await?;
        let mut listed = Vec::new();
        let mut system = BTreeMap::new();
        for slug in slugs {
            match table.get(slug) {
                Some(info) if info.is_system() => {
                    let counts = StreamCounts {
                        points: info.data_cnt,
                        events: info.event_cnt,
                    };
                    system.insert(slug.clone(), counts);
                }
                _ => listed.push(slug.clone()),
            }
        }
        let mut counts = self.count_listed_streams(&listed).await?;
        counts.extend(system);
        Ok(counts)
    }

    async fn count_listed_streams(
        &self,
        slugs: &[String],
    ) -> Result<BTreeMap<String, StreamCounts>, CloudError> {
        let first_only = query_args([("page_size", 1)]);

        let data_resources: Vec<String> = slugs
            .iter()
            .map(|slug| format!("stream/{}/data/", slug))
            .collect();
        let data = self
            .session
            .fetch_multiple(
                &data_resources[..],
                None,
                &first_only,
                &NoPostprocess,
                &TracingProgress::new("Counting Data in Streams"),
            )
            .await?;

        let event_resources = vec!["event/"; slugs.len()];
        let event_args: Vec<QueryArgs> = slugs
            .iter()
            .map(|slug| query_args([("filter", slug.as_str())]))
            .collect();
        let events = self
            .session
            .fetch_multiple(
                &event_resources[..],
                Some(&event_args[..]),
                &first_only,
                &NoPostprocess,
                &TracingProgress::new("Counting Events in Streams"),
            )
            .await?;

        slugs
            .iter()
            .zip(data_resources.iter().zip(data))
            .zip(events)
            .map(|((slug, (resource, data)), events)| -> Result<_, CloudError> {
                let points = Page::from_payload(resource, data)?.count;
                let events = Page::from_payload("event/", events)?.count;
                Ok((slug.clone(), StreamCounts { points, events }))
            })
            .collect()
    }

    /// Fetch the event metadata of a stream.
    pub async fn fetch_events(&self, slug: &str) -> Result<Vec<Event>, CloudError> {
        let args = query_args([("filter", QueryValue::from(slug)), ("mask", QueryValue::Int(1))]);
        let records = self
            .session
            .fetch_all(
                "event/",
                EVENT_PAGE_SIZE,
                &args,
                &TracingProgress::new("Downloading Events"),
            )
            .await?;
        let url = self.session.resource_url("event/");
        records.into_iter().map(|record| decode(&url, record)).collect()
    }

    /// Fetch every data point of a stream, in server order.
    pub async fn fetch_datapoints(&self, slug: &str) -> Result<Vec<DataPoint>, CloudError> {
        let args = query_args([("filter", QueryValue::from(slug)), ("mask", QueryValue::Int(1))]);
        let records = self
            .session
            .fetch_all(
                "data/",
                DATA_PAGE_SIZE,
                &args,
                &TracingProgress::new("Downloading Data"),
            )
            .await?;
        let url = self.session.resource_url("data/");
        records.into_iter().map(|record| decode(&url, record)).collect()
    }

    /// Fetch the raw payloads of the events of a stream that have one.
    ///
    /// # Arguments
    ///
    /// * `slug`: Stream slug
    /// * `postprocess`: Applied to each raw payload with its index in the result
    pub async fn fetch_raw_events(
        &self,
        slug: &str,
        postprocess: &dyn Postprocess,
    ) -> Result<Vec<RawEvent>, CloudError> {
        let events: Vec<Event> = self
            .fetch_events(slug)
            .await?
            .into_iter()
            .filter(|event| event.has_raw_data)
            .collect();
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let resources: Vec<String> = events
            .iter()
            .map(|event| format!("event/{}/data/", event.id))
            .collect();
        let payloads = self
            .session
            .fetch_multiple(
                &resources[..],
                None,
                &QueryArgs::new(),
                postprocess,
                &TracingProgress::new("Downloading Raw Event Data"),
            )
            .await?;
        Ok(events
            .into_iter()
            .zip(payloads)
            .map(|(event, data)| RawEvent {
                timestamp: event.timestamp,
                data,
            })
            .collect())
    }

    /// Fetch variable type definitions, keyed by slug.
    pub async fn fetch_variable_types(
        &self,
        slugs: &[String],
    ) -> Result<BTreeMap<String, Value>, CloudError> {
        let resources: Vec<String> = slugs
            .iter()
            .map(|slug| format!("vartype/{}/", slug))
            .collect();
        let variables = self
            .session
            .fetch_multiple(
                &resources[..],
                None,
                &QueryArgs::new(),
                &NoPostprocess,
                &TracingProgress::new("Fetching Variable Types"),
            )
            .await?;
        resources
            .iter()
            .zip(variables)
            .map(|(resource, variable)| -> Result<_, CloudError> {
                let slug = variable
                    .get("slug")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CloudError::MissingField {
                        url: self.session.resource_url(resource),
                        field: "slug",
                    })?
                    .to_string();
                Ok((slug, variable))
            })
            .collect()
    }
}

/// How to identify a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceLookup {
    /// Device slug, e.g. `d--0000-0000-0000-0001`
    Slug(String),
    /// External id assigned to the device
    ExternalId(String),
}

impl<T: Transport> CloudSession<T> {
    /// Fetch the record of a single device.
    ///
    /// Fails with [CloudError::NotFound] when no device matches and with
    /// [CloudError::AmbiguousDevice] when an external id matches several devices.
    pub async fn find_device(&self, lookup: &DeviceLookup) -> Result<Value, CloudError> {
        match lookup {
            DeviceLookup::Slug(slug) => {
                let resource = format!("device/{}/", slug);
                self.fetch(&resource, &QueryArgs::new())
                    .await
                    .map_err(|err| not_found(err, "device", slug))
            }
            DeviceLookup::ExternalId(external_id) => {
                let args = query_args([("external_id", external_id.as_str())]);
                let payload = self.fetch("device/", &args).await?;
                let url = self.resource_url("device/");
                let mut devices = Page::from_payload(&url, payload)?.results;
                match devices.len() {
                    0 => Err(CloudError::NotFound {
                        what: "device",
                        id: external_id.clone(),
                    }),
                    1 => Ok(devices.remove(0)),
                    _ => Err(CloudError::AmbiguousDevice {
                        external_id: external_id.clone(),
                        slugs: devices
                            .iter()
                            .filter_map(|device| device.get("slug").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect(),
                    }),
                }
            }
        }
    }

    /// Fetch the raw payload of a single event.
    pub async fn fetch_raw_event(&self, event_id: i64) -> Result<Value, CloudError> {
        let resource = format!("event/{}/data/", event_id);
        self.fetch(&resource, &QueryArgs::new())
            .await
            .map_err(|err| not_found(err, "event", &event_id.to_string()))
    }
}

fn not_found(err: CloudError, what: &'static str, id: &str) -> CloudError {
    match err {
        CloudError::HttpStatus { status, .. } if status == reqwest::StatusCode::NOT_FOUND => {
            CloudError::NotFound {
                what,
                id: id.to_string(),
            }
        }
        err => err,
    }
}

fn decode<D: DeserializeOwned>(url: &str, value: Value) -> Result<D, CloudError> {
    serde_json::from_value(value).map_err(|source| CloudError::MalformedPayload {
        url: url.to_string(),
        source,
    })
}
