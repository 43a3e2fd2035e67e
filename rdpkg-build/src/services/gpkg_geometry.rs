//! GeoPackage binary geometry encoding
//!
//! `GP` magic, version, flags, SRS id, an `[minx, maxx, miny, maxy]` envelope,
//! then little-endian WKB. Only MultiPolygon is written; every layer stores
//! MULTIPOLYGON.

use geo::{BoundingRect, LineString, MultiPolygon, Polygon};

const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOLYGON: u32 = 6;

/// Little-endian byte order flag, shared by the header and WKB
const LITTLE_ENDIAN: u8 = 1;
/// Header flag bits 1-3: envelope is `[minx, maxx, miny, maxy]`
const ENVELOPE_XY: u8 = 1 << 1;
/// Header flag bit 4: empty geometry
const EMPTY: u8 = 1 << 4;

/// Axis-aligned bounds `(min_x, min_y, max_x, max_y)`
pub type Extent = (f64, f64, f64, f64);

pub fn extent(geometry: &MultiPolygon<f64>) -> Option<Extent> {
    geometry
        .bounding_rect()
        .map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
}

/// Smallest extent covering both
pub fn merge_extent(a: Option<Extent>, b: Option<Extent>) -> Option<Extent> {
    match (a, b) {
        (Some(a), Some(b)) => Some((a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3))),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Encode a MultiPolygon as a GeoPackage geometry blob
pub fn encode_multipolygon(geometry: &MultiPolygon<f64>, srs_id: i32) -> Vec<u8> {
    let envelope = extent(geometry);
    let mut blob = Vec::with_capacity(8 + 32 + wkb_len(geometry));

    blob.extend_from_slice(b"GP");
    blob.push(0);
    let flags = match envelope {
        Some(_) => LITTLE_ENDIAN | ENVELOPE_XY,
        None => LITTLE_ENDIAN | EMPTY,
    };
    blob.push(flags);
    blob.extend_from_slice(&srs_id.to_le_bytes());

    if let Some((min_x, min_y, max_x, max_y)) = envelope {
        for v in [min_x, max_x, min_y, max_y] {
            blob.extend_from_slice(&v.to_le_bytes());
        }
    }

    write_wkb(&mut blob, geometry);
    blob
}

fn wkb_len(geometry: &MultiPolygon<f64>) -> usize {
    9 + geometry
        .0
        .iter()
        .map(|p| 9 + std::iter::once(p.exterior()).chain(p.interiors()).map(|r| 4 + 16 * r.0.len()).sum::<usize>())
        .sum::<usize>()
}

fn write_wkb(out: &mut Vec<u8>, geometry: &MultiPolygon<f64>) {
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&WKB_MULTIPOLYGON.to_le_bytes());
    out.extend_from_slice(&(geometry.0.len() as u32).to_le_bytes());
    for polygon in &geometry.0 {
        write_polygon(out, polygon);
    }
}

fn write_polygon(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    out.push(LITTLE_ENDIAN);
    out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
    let ring_count = 1 + polygon.interiors().len();
    out.extend_from_slice(&(ring_count as u32).to_le_bytes());
    write_ring(out, polygon.exterior());
    for ring in polygon.interiors() {
        write_ring(out, ring);
    }
}

fn write_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    out.extend_from_slice(&(ring.0.len() as u32).to_le_bytes());
    for coord in &ring.0 {
        out.extend_from_slice(&coord.x.to_le_bytes());
        out.extend_from_slice(&coord.y.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn read_f64(bytes: &[u8], at: usize) -> f64 {
        f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn square(x: f64, y: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
            (x: x, y: y),
        ]
    }

    #[test]
    fn test_header_and_envelope() {
        let mp = MultiPolygon(vec![square(-71.5, 41.0), square(-70.0, 42.0)]);
        let blob = encode_multipolygon(&mp, 4269);

        assert_eq!(&blob[0..2], b"GP");
        assert_eq!(blob[2], 0);
        assert_eq!(blob[3], 0x03);
        assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 4269);
        assert_eq!(read_f64(&blob, 8), -71.5);
        assert_eq!(read_f64(&blob, 16), -69.0);
        assert_eq!(read_f64(&blob, 24), 41.0);
        assert_eq!(read_f64(&blob, 32), 43.0);

        // WKB follows the 40-byte header
        assert_eq!(blob[40], 1);
        assert_eq!(read_u32(&blob, 41), WKB_MULTIPOLYGON);
        assert_eq!(read_u32(&blob, 45), 2);
        assert_eq!(blob.len(), 40 + wkb_len(&mp));
    }

    #[test]
    fn test_polygon_with_hole() {
        let outer = square(0.0, 0.0).exterior().clone();
        let hole: LineString<f64> = vec![(0.2, 0.2), (0.4, 0.2), (0.4, 0.4), (0.2, 0.2)].into();
        let mp = MultiPolygon(vec![Polygon::new(outer, vec![hole])]);
        let blob = encode_multipolygon(&mp, 4269);

        // polygon header starts after the multipolygon header (9 bytes)
        let polygon_at = 40 + 9;
        assert_eq!(read_u32(&blob, polygon_at + 1), WKB_POLYGON);
        assert_eq!(read_u32(&blob, polygon_at + 5), 2);
        assert_eq!(read_u32(&blob, polygon_at + 9), 5);
    }

    #[test]
    fn test_empty_geometry_has_no_envelope() {
        let blob = encode_multipolygon(&MultiPolygon::<f64>(vec![]), 4269);
        assert_eq!(blob[3], LITTLE_ENDIAN | EMPTY);
        assert_eq!(blob.len(), 8 + 9);
        assert_eq!(read_u32(&blob, 13), 0);
    }

    #[test]
    fn test_merge_extent() {
        let a = Some((0.0, 0.0, 1.0, 1.0));
        let b = Some((-1.0, 0.5, 0.5, 2.0));
        assert_eq!(merge_extent(a, b), Some((-1.0, 0.0, 1.0, 2.0)));
        assert_eq!(merge_extent(None, b), b);
        assert_eq!(merge_extent(None, None), None);
    }
}
