//! # GPX Codec
//!
//! Reads and writes GPX 1.1 documents.
//!
//! Import takes `<trkpt>` elements when the document has any and falls back to
//! `<wpt>` otherwise. Points with missing or unusable `lat`/`lon` attributes are
//! skipped; a point's `<time>` child is used when it parses as ISO8601, else the
//! moment the file was received. Export writes one track with one segment.
//!
//! ```rust
//! use route_recorder::{parse_gpx_at, serialize_gpx};
//!
//! let xml = r#"<gpx version="1.1" xmlns="http://www.topografix.com/GPX/1/1">
//!   <trk><name>Ridge line</name><trkseg>
//!     <trkpt lat="52.0" lon="5.0"><time>2026-03-01T09:00:00Z</time></trkpt>
//!     <trkpt lat="52.0" lon="5.001"><time>2026-03-01T09:01:00Z</time></trkpt>
//!   </trkseg></trk>
//! </gpx>"#;
//!
//! let route = parse_gpx_at(xml, None, 0).unwrap();
//! assert_eq!(route.name(), "Ridge line");
//! assert_eq!(route.total_duration_ms(), 60_000);
//!
//! let exported = serialize_gpx(&route).unwrap();
//! assert_eq!(parse_gpx_at(&exported, None, 0).unwrap().point_count(), 2);
//! ```

use std::io::Cursor;

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use log::{debug, info};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::{Coordinate, ImportError, RecordedRoute, RecorderError, Result, RoutePoint};

/// GPX 1.1 namespace.
pub const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";

const GPX_CREATOR: &str = "route-recorder";

// ============================================================================
// Import
// ============================================================================

/// Flat import result for UI collaborators: `{ success, error? }` plus the route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub route: Option<RecordedRoute>,
}

impl From<std::result::Result<RecordedRoute, ImportError>> for ImportOutcome {
    fn from(result: std::result::Result<RecordedRoute, ImportError>) -> Self {
        match result {
            Ok(route) => Self {
                success: true,
                error: None,
                route: Some(route),
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
                route: None,
            },
        }
    }
}

/// Parse a GPX document received now.
pub fn parse_gpx(
    xml: &str,
    fallback_name: Option<&str>,
) -> std::result::Result<RecordedRoute, ImportError> {
    parse_gpx_at(xml, fallback_name, SystemClock.now_ms())
}

/// Parse a GPX document received at `received_at_ms` (Unix milliseconds).
///
/// `received_at_ms` stamps points without a usable `<time>` and the generated
/// "Import <date>" name.
pub fn parse_gpx_at(
    xml: &str,
    fallback_name: Option<&str>,
    received_at_ms: i64,
) -> std::result::Result<RecordedRoute, ImportError> {
    let doc = read_document(xml)?;

    let (raw_points, source) = if doc.saw_trkpt {
        (doc.track_points, "trkpt")
    } else {
        (doc.waypoints, "wpt")
    };

    let total = raw_points.len();
    let points: Vec<RoutePoint> = raw_points
        .into_iter()
        .filter_map(|raw| raw.into_point(received_at_ms))
        .collect();

    if total > points.len() {
        debug!(
            "[Gpx] Skipped {} {} elements with invalid coordinates",
            total - points.len(),
            source
        );
    }

    if points.len() < 2 {
        return Err(ImportError::InsufficientPoints {
            found: points.len(),
        });
    }

    let name = [doc.track_name, doc.metadata_name]
        .into_iter()
        .flatten()
        .chain(fallback_name.map(str::to_string))
        .map(|n| n.trim().to_string())
        .find(|n| !n.is_empty())
        .unwrap_or_else(|| import_label(received_at_ms));

    let start = points[0].timestamp_ms;
    let end = points[points.len() - 1].timestamp_ms;
    let created_at =
        DateTime::<Utc>::from_timestamp_millis(received_at_ms).unwrap_or_else(Utc::now);
    let point_count = points.len();

    let route = RecordedRoute::from_parts(name, points, start, end, 0, created_at).ok_or(
        ImportError::InsufficientPoints {
            found: point_count,
        },
    )?;

    info!(
        "[Gpx] Imported '{}': {} {} points, {:.0} m",
        route.name(),
        route.point_count(),
        source,
        route.total_distance_meters()
    );
    Ok(route)
}

#[derive(Default)]
struct RawPoint {
    lat: Option<f64>,
    lon: Option<f64>,
    time_ms: Option<i64>,
}

impl RawPoint {
    fn from_attributes(element: &BytesStart<'_>) -> Self {
        let mut raw = RawPoint::default();
        for attr in element.attributes().flatten() {
            let value = match attr.unescape_value() {
                Ok(v) => v,
                Err(_) => continue,
            };
            match attr.key.local_name().as_ref() {
                b"lat" => raw.lat = value.trim().parse().ok(),
                b"lon" => raw.lon = value.trim().parse().ok(),
                _ => {}
            }
        }
        raw
    }

    fn into_point(self, received_at_ms: i64) -> Option<RoutePoint> {
        let coordinates = Coordinate::new(self.lon?, self.lat?);
        if !coordinates.is_valid() {
            return None;
        }
        Some(RoutePoint::new(
            coordinates,
            self.time_ms.unwrap_or(received_at_ms),
            None,
        ))
    }
}

#[derive(Default)]
struct GpxDocument {
    track_name: Option<String>,
    metadata_name: Option<String>,
    saw_trkpt: bool,
    track_points: Vec<RawPoint>,
    waypoints: Vec<RawPoint>,
}

enum PointKind {
    Track,
    Waypoint,
}

fn malformed(message: impl Into<String>) -> ImportError {
    ImportError::MalformedDocument {
        message: message.into(),
    }
}

/// Walk the document once, collecting names and points.
fn read_document(xml: &str) -> std::result::Result<GpxDocument, ImportError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut doc = GpxDocument::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;
    let mut current: Option<(PointKind, RawPoint)> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("at byte {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(ref e) => {
                if stack.is_empty() {
                    if saw_root {
                        return Err(malformed("multiple root elements"));
                    }
                    saw_root = true;
                }
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"trkpt" => {
                        doc.saw_trkpt = true;
                        current = Some((PointKind::Track, RawPoint::from_attributes(e)));
                    }
                    b"wpt" => {
                        current = Some((PointKind::Waypoint, RawPoint::from_attributes(e)));
                    }
                    _ => {}
                }
                text.clear();
                stack.push(local);
            }
            Event::Empty(ref e) => {
                if stack.is_empty() {
                    if saw_root {
                        return Err(malformed("multiple root elements"));
                    }
                    saw_root = true;
                }
                match e.local_name().as_ref() {
                    b"trkpt" => {
                        doc.saw_trkpt = true;
                        doc.track_points.push(RawPoint::from_attributes(e));
                    }
                    b"wpt" => doc.waypoints.push(RawPoint::from_attributes(e)),
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let value = e.unescape().map_err(|err| malformed(err.to_string()))?;
                if stack.is_empty() {
                    if !value.trim().is_empty() {
                        return Err(malformed("text outside the root element"));
                    }
                } else {
                    text.push_str(&value);
                }
            }
            Event::CData(ref e) => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Event::End(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                if stack.pop().as_deref() != Some(local.as_slice()) {
                    return Err(malformed(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(&local)
                    )));
                }
                let parent = stack.last().map(Vec::as_slice);

                match (local.as_slice(), parent) {
                    (b"name", Some(b"trk")) if doc.track_name.is_none() => {
                        doc.track_name = Some(text.trim().to_string());
                    }
                    (b"name", Some(b"metadata")) if doc.metadata_name.is_none() => {
                        doc.metadata_name = Some(text.trim().to_string());
                    }
                    (b"time", Some(b"trkpt")) | (b"time", Some(b"wpt")) => {
                        if let Some((_, raw)) = current.as_mut() {
                            raw.time_ms = DateTime::parse_from_rfc3339(text.trim())
                                .ok()
                                .map(|t| t.timestamp_millis());
                        }
                    }
                    (b"trkpt", _) | (b"wpt", _) => {
                        if let Some((kind, raw)) = current.take() {
                            match kind {
                                PointKind::Track => doc.track_points.push(raw),
                                PointKind::Waypoint => doc.waypoints.push(raw),
                            }
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed(format!(
            "unexpected end of document, <{}> not closed",
            String::from_utf8_lossy(&stack[stack.len() - 1])
        )));
    }
    if !saw_root {
        return Err(malformed("no root element"));
    }

    Ok(doc)
}

fn import_label(received_at_ms: i64) -> String {
    match Local.timestamp_millis_opt(received_at_ms).single() {
        Some(local) => format!("Import {}", local.format("%Y-%m-%d %H:%M")),
        None => "Import".to_string(),
    }
}

// ============================================================================
// Export
// ============================================================================

fn xml_error(e: impl std::fmt::Display) -> RecorderError {
    RecorderError::Serialization {
        message: format!("GPX write failed: {}", e),
    }
}

fn iso8601(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)?;
    Ok(())
}

/// Serialize a route as a GPX 1.1 document with a single track segment.
pub fn serialize_gpx(route: &RecordedRoute) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    let mut gpx = BytesStart::new("gpx");
    gpx.push_attribute(("version", "1.1"));
    gpx.push_attribute(("creator", GPX_CREATOR));
    gpx.push_attribute(("xmlns", GPX_NAMESPACE));
    writer.write_event(Event::Start(gpx)).map_err(xml_error)?;

    writer
        .write_event(Event::Start(BytesStart::new("metadata")))
        .map_err(xml_error)?;
    write_text_element(&mut writer, "name", route.name())?;
    write_text_element(&mut writer, "time", &iso8601(route.start_time_ms()))?;
    writer
        .write_event(Event::End(BytesEnd::new("metadata")))
        .map_err(xml_error)?;

    writer
        .write_event(Event::Start(BytesStart::new("trk")))
        .map_err(xml_error)?;
    write_text_element(&mut writer, "name", route.name())?;
    writer
        .write_event(Event::Start(BytesStart::new("trkseg")))
        .map_err(xml_error)?;

    for point in route.points() {
        let lat = point.coordinates.latitude.to_string();
        let lon = point.coordinates.longitude.to_string();
        let mut trkpt = BytesStart::new("trkpt");
        trkpt.push_attribute(("lat", lat.as_str()));
        trkpt.push_attribute(("lon", lon.as_str()));
        writer.write_event(Event::Start(trkpt)).map_err(xml_error)?;
        write_text_element(&mut writer, "time", &iso8601(point.timestamp_ms))?;
        writer
            .write_event(Event::End(BytesEnd::new("trkpt")))
            .map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("trkseg")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("trk")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("gpx")))
        .map_err(xml_error)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(xml_error)
}

/// File name for exporting a route: the name with unsafe characters replaced.
pub fn export_file_name(route: &RecordedRoute) -> String {
    let stem: String = route
        .name()
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "route.gpx".to_string()
    } else {
        format!("{}.gpx", stem)
    }
}
