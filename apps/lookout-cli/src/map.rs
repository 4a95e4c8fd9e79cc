use lookout_types::instance::{youtube_video_id, Instance};

/// Centre of the default view (continental US).
pub const DEFAULT_CENTER: (f64, f64) = (39.8283, -98.5795);
const DEFAULT_SPAN_LAT: f64 = 15.0;
const DEFAULT_SPAN_LON: f64 = 30.0;
const PADDING_DEG: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub running: bool,
    pub popup: Vec<String>,
}

pub fn markers(instances: &[Instance]) -> Vec<MapMarker> {
    instances
        .iter()
        .filter(|instance| instance.has_location())
        .map(|instance| MapMarker {
            name: instance.name.clone(),
            latitude: instance.latitude,
            longitude: instance.longitude,
            running: instance.is_running(),
            popup: popup_lines(instance),
        })
        .collect()
}

fn popup_lines(instance: &Instance) -> Vec<String> {
    let video = youtube_video_id(instance.source.url()).unwrap_or_else(|| "Unknown".into());
    vec![
        format!(
            "{} [{}]",
            instance.name,
            instance.status.as_str().to_uppercase()
        ),
        format!("Frequency: {}s", instance.frequency),
        format!("Type: {} ({})", instance.source.label(), video),
        format!(
            "Location: {:.4}, {:.4}",
            instance.latitude, instance.longitude
        ),
    ]
}

/// `([min_lon, max_lon], [min_lat, max_lat])` covering every marker.
pub fn bounds(markers: &[MapMarker]) -> ([f64; 2], [f64; 2]) {
    if markers.is_empty() {
        let (lat, lon) = DEFAULT_CENTER;
        return (
            [lon - DEFAULT_SPAN_LON, lon + DEFAULT_SPAN_LON],
            [lat - DEFAULT_SPAN_LAT, lat + DEFAULT_SPAN_LAT],
        );
    }
    let (mut min_lon, mut max_lon) = (f64::MAX, f64::MIN);
    let (mut min_lat, mut max_lat) = (f64::MAX, f64::MIN);
    for marker in markers {
        min_lon = min_lon.min(marker.longitude);
        max_lon = max_lon.max(marker.longitude);
        min_lat = min_lat.min(marker.latitude);
        max_lat = max_lat.max(marker.latitude);
    }
    (
        [
            (min_lon - PADDING_DEG).max(-180.0),
            (max_lon + PADDING_DEG).min(180.0),
        ],
        [
            (min_lat - PADDING_DEG).max(-90.0),
            (max_lat + PADDING_DEG).min(90.0),
        ],
    )
}
