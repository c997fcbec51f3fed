//! Test utilities for integration tests.
//!
//! Builds synthetic containers that mimic real instrument output: raw
//! row-oriented payloads for each acquisition followed by one trailing
//! metadata document, optionally in the legacy NUL-interleaved encoding.

use std::fs;
use std::path::{Path, PathBuf};

/// Junk bytes before the first payload, standing in for instrument
/// preamble data.
const PREAMBLE_BYTES: usize = 64;

/// One synthetic acquisition: a rectangle of constant-filled channels at a
/// stage position.
#[derive(Debug, Clone)]
pub struct AcqSpec {
    pub id: i64,
    pub description: String,
    /// Stage position of the boundary's minimum corner, in microns
    pub origin_um: (f64, f64),
    pub width: usize,
    pub height: usize,
    pub pixel_size: f64,
    pub timestamp: String,
    /// Constant fill per channel (two measurement channels)
    pub channel_fill: [f32; 2],
    /// Bytes cut off the end of the written payload while the declared
    /// range keeps the full length. Only meaningful on the last
    /// acquisition, because truncation shifts every later payload.
    pub truncate_bytes: usize,
}

impl AcqSpec {
    pub fn new(id: i64, origin_um: (f64, f64), width: usize, height: usize) -> Self {
        AcqSpec {
            id,
            description: format!("ROI_{id}"),
            origin_um,
            width,
            height,
            pixel_size: 1.0,
            timestamp: format!("2024-01-01T10:{:02}:00+00:00", id % 60),
            channel_fill: [id as f32, id as f32 * 10.0],
            truncate_bytes: 0,
        }
    }

    fn payload_len(&self) -> usize {
        // rows of (x, y, z, ch0, ch1) as f32
        self.width * self.height * 5 * 4
    }

    fn payload(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload_len());
        for y in 0..self.height {
            for x in 0..self.width {
                for value in [
                    x as f32,
                    y as f32,
                    0.0,
                    self.channel_fill[0],
                    self.channel_fill[1],
                ] {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        bytes.truncate(bytes.len() - self.truncate_bytes);
        bytes
    }
}

/// Assemble the container bytes: preamble, payloads, then the metadata
/// document.
pub fn build_container(specs: &[AcqSpec], nul_interleaved: bool) -> Vec<u8> {
    let mut data = vec![0u8; PREAMBLE_BYTES];

    let mut ranges = Vec::new();
    for spec in specs {
        let start = data.len();
        let declared_len = spec.payload_len();
        data.extend_from_slice(&spec.payload());
        ranges.push((start as u64, (start + declared_len) as u64));
    }

    let document = build_document(specs, &ranges);
    if nul_interleaved {
        for &b in document.as_bytes() {
            data.push(b);
            data.push(0);
        }
    } else {
        data.extend_from_slice(document.as_bytes());
    }

    data
}

/// Write a synthetic container to `dir/name` and return its path.
pub fn write_container(dir: &Path, name: &str, specs: &[AcqSpec]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, build_container(specs, false)).unwrap();
    path
}

fn build_document(specs: &[AcqSpec], ranges: &[(u64, u64)]) -> String {
    let mut xml = String::from("<MCDSchema xmlns=\"http://www.fluidigm.com/IMC/MCDSchema.xsd\">\n");
    xml.push_str("  <Slide><ID>0</ID><Description>synthetic slide</Description><SwVersion>7.0</SwVersion></Slide>\n");
    xml.push_str("  <Panorama><ID>1</ID><SlideID>0</SlideID></Panorama>\n");

    let mut next_id = 1000;
    for (index, spec) in specs.iter().enumerate() {
        let roi_id = 100 + index as i64;
        let (start, end) = ranges[index];
        let (x0, y0) = spec.origin_um;
        let x1 = x0 + spec.width as f64 * spec.pixel_size;
        let y1 = y0 + spec.height as f64 * spec.pixel_size;

        xml.push_str(&format!(
            "  <AcquisitionROI><ID>{roi_id}</ID><PanoramaID>1</PanoramaID></AcquisitionROI>\n"
        ));
        xml.push_str(&format!(
            "  <Acquisition><ID>{}</ID><AcquisitionROIID>{roi_id}</AcquisitionROIID>\
<Description>{}</Description><OrderNumber>{}</OrderNumber>\
<DataStartOffset>{start}</DataStartOffset><DataEndOffset>{end}</DataEndOffset>\
<ValueBytes>4</ValueBytes><MaxX>{}</MaxX><MaxY>{}</MaxY>\
<AblationDistanceBetweenShotsX>{}</AblationDistanceBetweenShotsX>\
<AblationDistanceBetweenShotsY>{}</AblationDistanceBetweenShotsY>\
<StartTimeStamp>{}</StartTimeStamp></Acquisition>\n",
            spec.id,
            spec.description,
            index + 1,
            spec.width,
            spec.height,
            spec.pixel_size,
            spec.pixel_size,
            spec.timestamp,
        ));

        let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
        for (order, (px, py)) in corners.iter().enumerate() {
            xml.push_str(&format!(
                "  <ROIPoint><ID>{next_id}</ID><AcquisitionROIID>{roi_id}</AcquisitionROIID>\
<OrderNumber>{}</OrderNumber><SlideXPosUm>{px}</SlideXPosUm><SlideYPosUm>{py}</SlideYPosUm></ROIPoint>\n",
                order + 1,
            ));
            next_id += 1;
        }

        let channels = [
            ("X", "X"),
            ("Y", "Y"),
            ("Z", "Z"),
            ("Ir191", "DNA1"),
            ("Ir193", "DNA2"),
        ];
        for (order, (name, label)) in channels.iter().enumerate() {
            xml.push_str(&format!(
                "  <AcquisitionChannel><ID>{next_id}</ID><AcquisitionID>{}</AcquisitionID>\
<OrderNumber>{order}</OrderNumber><ChannelName>{name}</ChannelName>\
<ChannelLabel>{label}</ChannelLabel></AcquisitionChannel>\n",
                spec.id,
            ));
            next_id += 1;
        }
    }

    xml.push_str("</MCDSchema>");
    xml
}

/// Recursively collect (relative path, content) pairs under a directory.
pub fn dir_contents(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries);
    entries.sort();
    entries
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            out.push((relative, fs::read(&path).unwrap()));
        }
    }
}
