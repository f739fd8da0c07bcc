//! ISO-BMFF box lookup over in-memory segments, for checking writer output.

/// Iterate the boxes of one nesting level as `(type, payload)` pairs.
/// Stops at the first truncated or malformed header.
pub fn boxes(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        if pos + 8 > data.len() {
            return None;
        }
        let size = read_u32(data, pos)? as usize;
        if size < 8 || pos + size > data.len() {
            return None;
        }
        let kind = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let payload = &data[pos + 8..pos + size];
        pos += size;
        Some((kind, payload))
    })
}

/// Payload of the first box reached by following `path`
pub fn find_box<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let (first, rest) = path.split_first()?;
    let (_, payload) = boxes(data).find(|(kind, _)| kind == *first)?;
    if rest.is_empty() {
        Some(payload)
    } else {
        find_box(payload, rest)
    }
}

/// Count top-level boxes of one type
pub fn count_boxes(data: &[u8], kind: &[u8; 4]) -> usize {
    boxes(data).filter(|(k, _)| k == kind).count()
}

/// Big-endian u32 at `pos`
pub fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = ((8 + payload.len()) as u32).to_be_bytes().to_vec();
        v.extend_from_slice(kind);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn test_find_box_path() {
        let inner = make_box(b"mfhd", &[0, 0, 0, 0, 0, 0, 0, 9]);
        let data = make_box(b"moof", &inner);
        let mfhd = find_box(&data, &[b"moof", b"mfhd"]).unwrap();
        assert_eq!(read_u32(mfhd, 4), Some(9));
        assert!(find_box(&data, &[b"moov"]).is_none());
        assert!(find_box(&data, &[]).is_none());
    }

    #[test]
    fn test_truncated_box_stops() {
        let mut data = make_box(b"free", &[0; 4]);
        data.extend_from_slice(&[0, 0, 0, 50, b'm', b'd', b'a', b't', 1]);
        assert_eq!(boxes(&data).count(), 1);
        assert_eq!(count_boxes(&data, b"free"), 1);
        assert_eq!(count_boxes(&data, b"mdat"), 0);
    }
}
