use clap::Parser;
use large_point_lib::{ClusterConfig, Config, StatusFilter, ViewportBox};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
/// Large Point - Cluster a CSV of geolocated records and query it like a map viewport
pub struct Settings {
    /// CSV file with a header line
    #[arg(long, value_name = "FILE")]
    pub csv: PathBuf,

    /// Merge radius in pixels
    #[arg(long, default_value_t = 60.0)]
    pub radius: f64,

    /// Tile size in pixels
    #[arg(long, default_value_t = 512.0)]
    pub extent: f64,

    #[arg(long, default_value_t = 0)]
    pub min_zoom: u8,

    #[arg(long, default_value_t = 19)]
    pub max_zoom: u8,

    /// Minimum number of points forming a cluster
    #[arg(long, default_value_t = 2)]
    pub min_points: usize,

    /// Minimum zoom used when jumping to a looked-up record
    #[arg(long, default_value_t = 16)]
    pub focus_zoom: u8,

    /// Viewport zoom (fractional zooms are floored)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub zoom: f64,

    /// Viewport as west,south,east,north in degrees (default: whole world)
    #[arg(long, value_name = "W,S,E,N", value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<ViewportBox>,

    /// Only render points with this status ("all" disables filtering)
    #[arg(long, default_value = "all")]
    pub status: StatusFilter,

    /// Record identifier to navigate to
    #[arg(long, value_name = "ID")]
    pub lookup: Option<String>,

    /// Node to zoom into
    #[arg(long, value_name = "CLUSTER_ID")]
    pub expand: Option<u64>,

    /// Node whose points to list
    #[arg(long, value_name = "CLUSTER_ID")]
    pub leaves: Option<u64>,

    /// Page size for --leaves
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Page offset for --leaves
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,
}

impl Settings {
    pub fn to_config(&self) -> Config {
        Config {
            cluster: ClusterConfig {
                radius: self.radius,
                extent: self.extent,
                min_zoom: self.min_zoom,
                max_zoom: self.max_zoom,
                min_points: self.min_points,
                ..ClusterConfig::default()
            },
            focus_zoom: self.focus_zoom,
            ..Config::default()
        }
    }

    pub fn viewport(&self) -> ViewportBox {
        self.bbox.unwrap_or_else(ViewportBox::world)
    }
}

fn parse_bbox(s: &str) -> Result<ViewportBox, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid coordinate in {s:?}: {e}"))?;

    match values.as_slice() {
        &[west, south, east, north] => Ok(ViewportBox::new(west, south, east, north)),
        _ => Err(format!(
            "expected 4 comma-separated values, got {}",
            values.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["large-point", "--csv", "data.csv"]).unwrap();
        assert_eq!(settings.csv, PathBuf::from("data.csv"));
        assert_eq!(settings.status, StatusFilter::All);
        assert_eq!(settings.viewport(), ViewportBox::world());
        assert_eq!(settings.to_config(), Config::default());
    }

    #[test]
    fn test_csv_is_required() {
        assert!(Settings::try_parse_from(["large-point"]).is_err());
    }

    #[test]
    fn test_viewport_arguments() {
        let settings = Settings::try_parse_from([
            "large-point",
            "--csv",
            "data.csv",
            "--bbox",
            "-10.5,20,30,40.25",
            "--zoom",
            "7.5",
            "--status",
            "approved",
        ])
        .unwrap();
        assert_eq!(
            settings.viewport(),
            ViewportBox::new(-10.5, 20.0, 30.0, 40.25)
        );
        assert_eq!(settings.zoom, 7.5);
        assert_eq!(settings.status, StatusFilter::Only("approved".to_string()));
    }

    #[test]
    fn test_cluster_arguments() {
        let settings = Settings::try_parse_from([
            "large-point",
            "--csv",
            "data.csv",
            "--radius",
            "40",
            "--max-zoom",
            "16",
            "--min-points",
            "3",
        ])
        .unwrap();
        let config = settings.to_config();
        assert_eq!(config.cluster.radius, 40.0);
        assert_eq!(config.cluster.max_zoom, 16);
        assert_eq!(config.cluster.min_points, 3);
        assert_eq!(config.cluster.extent, 512.0);
    }

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("170, -10, -170, 10").unwrap(),
            ViewportBox::new(170.0, -10.0, -170.0, 10.0)
        );
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("1,2,x,4").is_err());
    }
}
