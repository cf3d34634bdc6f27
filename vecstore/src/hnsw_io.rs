use std::io::{BufReader, BufWriter, Read, Write};

use crate::ann::BuildParams;
use crate::error::VecError;
use crate::hnsw::{Hnsw, HnswNode};
use crate::metric::Metric;

/// Binary format magic and version.
const LANN_MAGIC: [u8; 4] = [b'L', b'A', b'N', b'N'];
const LANN_VERSION: u32 = 1;

/// Save serializes an HNSW structure to a writer in a compact binary format:
///
/// ```text
/// [4B magic "LANN"] [4B version=1]
/// [1B metric (0=euclidean, 1=cosine)]
/// [4B dim] [4B M] [4B efConstruction] [4B efSearch] [8B seed]
/// [4B count] [4B maxLevel] [4B entry]
/// For each node (offset order):
///   [4B level]
///   [dim x 4B float32 vector]
///   For each layer 0..=level:
///     [4B numFriends] [numFriends x 4B friend offsets]
/// ```
///
/// All multi-byte values are little-endian. Offsets are dense, so there are
/// no slot flags or free lists.
pub fn save(h: &Hnsw, w: &mut dyn Write) -> Result<(), VecError> {
    let mut bw = BufWriter::new(w);
    let write_err = |e: std::io::Error| VecError::Io(e.to_string());

    // Header.
    bw.write_all(&LANN_MAGIC).map_err(write_err)?;
    bw.write_all(&LANN_VERSION.to_le_bytes()).map_err(write_err)?;
    let metric_byte: u8 = match h.metric {
        Metric::Euclidean => 0,
        Metric::Cosine => 1,
    };
    bw.write_all(&[metric_byte]).map_err(write_err)?;

    // Build params.
    bw.write_all(&(h.dim as u32).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&(h.params.m as u32).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&(h.params.ef_construction as u32).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&(h.params.ef_search as u32).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&h.params.seed.to_le_bytes()).map_err(write_err)?;

    // Structure metadata.
    bw.write_all(&(h.nodes.len() as u32).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&(h.max_level as u32).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&h.entry.to_le_bytes()).map_err(write_err)?;

    // Nodes.
    for nd in &h.nodes {
        bw.write_all(&(nd.level as u32).to_le_bytes()).map_err(write_err)?;
        for &v in &nd.vector {
            bw.write_all(&v.to_le_bytes()).map_err(write_err)?;
        }
        for lev in 0..=nd.level {
            let friends = &nd.friends[lev];
            bw.write_all(&(friends.len() as u32).to_le_bytes()).map_err(write_err)?;
            for &f in friends {
                bw.write_all(&f.to_le_bytes()).map_err(write_err)?;
            }
        }
    }

    bw.flush().map_err(write_err)?;
    Ok(())
}

/// Load deserializes an HNSW structure from a reader.
///
/// The entry point and max level are recomputed from the node data; file
/// metadata is read but not trusted.
pub fn load(r: &mut dyn Read) -> Result<Hnsw, VecError> {
    let mut br = BufReader::new(r);
    let read_err = |e: std::io::Error| VecError::Io(e.to_string());

    let mut buf4 = [0u8; 4];

    // Magic.
    br.read_exact(&mut buf4).map_err(read_err)?;
    if buf4 != LANN_MAGIC {
        return Err(VecError::InvalidFormat(format!("invalid magic {:?}", buf4)));
    }

    // Version.
    br.read_exact(&mut buf4).map_err(read_err)?;
    let version = u32::from_le_bytes(buf4);
    if version != LANN_VERSION {
        return Err(VecError::InvalidFormat(format!(
            "unsupported version {version} (want {LANN_VERSION})"
        )));
    }

    // Metric.
    let mut mbuf = [0u8; 1];
    br.read_exact(&mut mbuf).map_err(read_err)?;
    let metric = match mbuf[0] {
        0 => Metric::Euclidean,
        1 => Metric::Cosine,
        other => {
            return Err(VecError::InvalidFormat(format!("unknown metric tag {other}")));
        }
    };

    let read_u32 = |br: &mut BufReader<&mut dyn Read>| -> Result<u32, VecError> {
        let mut buf = [0u8; 4];
        br.read_exact(&mut buf).map_err(|e| VecError::Io(e.to_string()))?;
        Ok(u32::from_le_bytes(buf))
    };

    // Build params.
    let dim = read_u32(&mut br)? as usize;
    if dim == 0 {
        return Err(VecError::InvalidFormat("invalid dimension 0".into()));
    }
    let m = read_u32(&mut br)? as usize;
    let ef_c = read_u32(&mut br)? as usize;
    let ef_s = read_u32(&mut br)? as usize;
    let mut buf8 = [0u8; 8];
    br.read_exact(&mut buf8).map_err(read_err)?;
    let seed = u64::from_le_bytes(buf8);

    // Metadata; entry/maxLevel are read but not trusted.
    let count = read_u32(&mut br)? as usize;
    if count == 0 {
        return Err(VecError::EmptyBuild);
    }
    let _file_max_level = read_u32(&mut br)?;
    let _file_entry = read_u32(&mut br)?;

    // Nodes.
    let mut nodes: Vec<HnswNode> = Vec::with_capacity(count);
    for _ in 0..count {
        let level = read_u32(&mut br)? as usize;
        if level > 31 {
            return Err(VecError::InvalidFormat(format!(
                "node level {level} exceeds maximum 31"
            )));
        }

        let mut vector = vec![0.0f32; dim];
        for v in &mut vector {
            let mut fb = [0u8; 4];
            br.read_exact(&mut fb).map_err(read_err)?;
            *v = f32::from_le_bytes(fb);
        }

        let mut friends = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let nf = read_u32(&mut br)? as usize;
            let mut layer_friends = Vec::with_capacity(nf);
            for _ in 0..nf {
                let f_id = read_u32(&mut br)?;
                if f_id as usize >= count {
                    return Err(VecError::InvalidFormat(format!(
                        "friend offset {f_id} out of bounds (count={count})"
                    )));
                }
                layer_friends.push(f_id);
            }
            friends.push(layer_friends);
        }

        nodes.push(HnswNode {
            vector,
            level,
            friends,
        });
    }

    // Recompute derived state from actual data.
    let mut entry = 0u32;
    let mut max_level = 0usize;
    for (i, nd) in nodes.iter().enumerate() {
        if nd.level > max_level {
            max_level = nd.level;
            entry = i as u32;
        }
    }

    let mut params = BuildParams {
        m,
        ef_construction: ef_c,
        ef_search: ef_s,
        seed,
    };
    params.set_defaults();

    Ok(Hnsw::from_parts(metric, dim, params, nodes, entry, max_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::AnnIndex;

    fn build_test_hnsw() -> Hnsw {
        let vectors = vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.9, 0.1, 0.0, 0.0],
        ];
        Hnsw::build(
            Metric::Euclidean,
            4,
            &vectors,
            BuildParams {
                m: 8,
                ef_construction: 64,
                ef_search: 32,
                seed: 3,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_save_load() {
        let h = build_test_hnsw();

        let mut buf = Vec::new();
        save(&h, &mut buf).unwrap();

        let h2 = load(&mut buf.as_slice()).unwrap();
        assert_eq!(h2.len(), h.len());
        assert_eq!(h2.dimension(), h.dimension());
        assert_eq!(h2.metric(), Metric::Euclidean);

        let query = [1.0f32, 0.0, 0.0, 0.0];
        let m1 = h.search(&query, 3, 0).unwrap();
        let m2 = h2.search(&query, 3, 0).unwrap();
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_save_load_cosine() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let h = Hnsw::build(Metric::Cosine, 2, &vectors, BuildParams::default()).unwrap();

        let mut buf = Vec::new();
        save(&h, &mut buf).unwrap();
        let h2 = load(&mut buf.as_slice()).unwrap();
        assert_eq!(h2.metric(), Metric::Cosine);
    }

    #[test]
    fn test_load_invalid_magic() {
        let bad = b"NOPE";
        assert!(load(&mut bad.as_slice()).is_err());
    }

    #[test]
    fn test_load_truncated() {
        let h = build_test_hnsw();
        let mut buf = Vec::new();
        save(&h, &mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(load(&mut buf.as_slice()).is_err());
    }
}
