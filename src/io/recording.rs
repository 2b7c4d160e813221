//! Recorded marker detections for offline replay.
//!
//! One CSV row per detected marker:
//!
//! ```text
//! tick,camera,fx,fy,cx,cy,marker_id,x0,y0,x1,y1,x2,y2,x3,y3
//! ```
//!
//! Rows are grouped into one [`CameraObservation`] per `(tick, camera)`. A
//! header row and `#` comments are allowed.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use nalgebra::Point2;

use crate::cameras::{CameraId, CameraObservation};
use crate::geometry::CameraIntrinsics;
use crate::markers::{MarkerDetection, MarkerId};

const COLUMNS: usize = 15;

/// All observations of one recorded tick, ordered by camera.
#[derive(Debug, Clone)]
pub struct RecordedTick {
    pub tick: u64,
    pub observations: Vec<CameraObservation>,
}

#[derive(Debug, Default)]
pub struct Recording {
    pub ticks: Vec<RecordedTick>,
}

impl Recording {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let rdr = ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(rdr).with_context(|| format!("Failed to read {}", path.display()))
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let rdr = ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        Self::from_reader(rdr)
    }

    fn from_reader<R: std::io::Read>(mut rdr: csv::Reader<R>) -> Result<Self> {
        let mut grouped: BTreeMap<u64, BTreeMap<CameraId, CameraObservation>> = BTreeMap::new();
        for (line, rec) in rdr.records().enumerate() {
            let rec = rec?;
            if line == 0 && rec.get(0) == Some("tick") {
                continue;
            }
            let row = parse_row(&rec).with_context(|| format!("row {}", line + 1))?;
            grouped
                .entry(row.tick)
                .or_default()
                .entry(row.camera)
                .or_insert_with(|| CameraObservation::new(row.camera, row.intrinsics))
                .markers
                .push(row.detection);
        }
        let ticks = grouped
            .into_iter()
            .map(|(tick, cams)| RecordedTick {
                tick,
                observations: cams.into_values().collect(),
            })
            .collect();
        Ok(Self { ticks })
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

struct Row {
    tick: u64,
    camera: CameraId,
    intrinsics: CameraIntrinsics,
    detection: MarkerDetection,
}

fn parse_row(rec: &StringRecord) -> Result<Row> {
    if rec.len() < COLUMNS {
        bail!("expected {} columns, found {}", COLUMNS, rec.len());
    }
    let f = |i: usize| -> Result<f64> {
        rec[i]
            .parse()
            .with_context(|| format!("column {} is not a number: {:?}", i, &rec[i]))
    };
    let mut corners = [Point2::origin(); 4];
    for (k, corner) in corners.iter_mut().enumerate() {
        *corner = Point2::new(f(7 + 2 * k)?, f(8 + 2 * k)?);
    }
    Ok(Row {
        tick: rec[0].parse().context("tick")?,
        camera: CameraId(rec[1].parse().context("camera")?),
        intrinsics: CameraIntrinsics::new(f(2)?, f(3)?, f(4)?, f(5)?),
        detection: MarkerDetection::new(MarkerId(rec[6].parse().context("marker_id")?), corners),
    })
}
