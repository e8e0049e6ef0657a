//! Minimal GPX track reader.

use std::str::from_utf8;

use quick_xml::events::{BytesStart, Event};

use crate::geo::LatLon;

/// Reads every `trkpt` of a GPX document, in document order.
///
/// Track points with missing or unparsable coordinates are skipped.
pub fn track_points(data: &[u8]) -> Result<Vec<LatLon>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(data);
    let mut points = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) | Event::Empty(start) => {
                if start.local_name().as_ref() == b"trkpt" {
                    if let Some(point) = parse_trkpt(&start) {
                        points.push(point);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(points)
}

fn parse_trkpt(start: &BytesStart<'_>) -> Option<LatLon> {
    let mut lat = f64::NAN;
    let mut lon = f64::NAN;

    for attr in start.attributes() {
        let attr = attr.ok()?;
        match attr.key.as_ref() {
            b"lat" => lat = from_utf8(&attr.value).ok()?.trim().parse().ok()?,
            b"lon" => lon = from_utf8(&attr.value).ok()?.trim().parse().ok()?,
            _ => {}
        }
    }

    (lat.is_finite() && lon.is_finite()).then(|| LatLon::new(lat, lon))
}
