use ndarray::{ArrayD, IxDyn};
use tempfile::tempdir;

use crate::config::{CodecConfig, PackParams};
use crate::error::TambakError;
use crate::tensor::*;
use crate::types::{DType, ScalarKind};

fn small_chunks() -> PackParams {
    PackParams {
        chunk_nbytes: 1000,
        ..PackParams::default()
    }
}

#[test]
fn test_ascending_int64_packs_small() {
    let data = ArrayD::from_shape_fn(IxDyn(&[10_000]), |ix| ix[0] as i64);
    let packed = pack_tensor(&data, &PackParams::default()).unwrap();
    assert!(packed.len() < 80_000, "packed to {} bytes", packed.len());

    let restored = unpack_ndarray::<i64>(&packed).unwrap();
    assert_eq!(restored.into_raw_vec_and_offset().0, (0..10_000).collect::<Vec<i64>>());
}

#[test]
fn test_roundtrip_across_dtypes_and_shapes() {
    let floats = ArrayD::from_shape_fn(IxDyn(&[17, 9, 3]), |ix| (ix[0] * 27 + ix[1] * 3 + ix[2]) as f32 * 0.1);
    let packed = pack_tensor(&floats, &small_chunks()).unwrap();
    assert_eq!(unpack_ndarray::<f32>(&packed).unwrap(), floats);

    let flags = ArrayD::from_shape_fn(IxDyn(&[33]), |ix| ix[0] % 3 == 0);
    let packed = pack_tensor(&flags, &small_chunks()).unwrap();
    assert_eq!(unpack_ndarray::<bool>(&packed).unwrap(), flags);

    let empty = ArrayD::<u32>::zeros(IxDyn(&[0, 4]));
    let packed = pack_tensor(&empty, &PackParams::default()).unwrap();
    let restored = unpack_tensor(&packed).unwrap();
    assert_eq!(restored.shape, vec![0, 4]);
    assert!(restored.data.is_empty());

    assert!(matches!(
        unpack_ndarray::<i64>(&pack_tensor(&floats, &small_chunks()).unwrap()),
        Err(TambakError::DTypeMismatch(_))
    ));
}

#[test]
fn test_structured_roundtrip() {
    let dtype = DType::structured(vec![
        ("id", DType::Scalar(ScalarKind::Int32)),
        ("value", DType::Scalar(ScalarKind::Float32)),
        ("tag", DType::Bytes(8)),
    ])
    .unwrap();
    let mut data = Vec::new();
    for i in 0..500i32 {
        data.extend_from_slice(&i.to_le_bytes());
        data.extend_from_slice(&(i as f32 / 7.0).to_le_bytes());
        data.extend_from_slice(format!("tag{:05}", i).as_bytes());
    }
    let tensor = TensorBuffer::new(vec![500], dtype, data).unwrap();

    let packed = pack_tensor(&tensor, &small_chunks()).unwrap();
    assert_eq!(unpack_tensor(&packed).unwrap(), tensor);
}

#[test]
fn test_compressible_data_shrinks() {
    let data = ArrayD::from_shape_fn(IxDyn(&[256, 256]), |ix| (ix[0] / 16) as f64);
    let raw = data.len() * 8;
    let packed = pack_tensor(&data, &PackParams::default()).unwrap();
    assert!(packed.len() < raw / 10);

    let stored = PackParams {
        codec: CodecConfig {
            level: 0,
            filters: Vec::new(),
            ..CodecConfig::default()
        },
        ..PackParams::default()
    };
    let unpacked_size = pack_tensor(&data, &stored).unwrap().len();
    assert!(unpacked_size >= raw);
}

#[test]
fn test_sparse_and_contiguous_files_agree() {
    let dir = tempdir().unwrap();
    let data = ArrayD::from_shape_fn(IxDyn(&[50, 40]), |ix| (ix[0] * ix[1]) as i16);

    let file = dir.path().join("tensor.tbk");
    let written = save_tensor(&data, &file, &small_chunks()).unwrap();
    assert_eq!(written, std::fs::metadata(&file).unwrap().len());

    let sparse_dir = dir.path().join("tensor.d");
    let sparse = PackParams {
        contiguous: false,
        ..small_chunks()
    };
    save_tensor(&data, &sparse_dir, &sparse).unwrap();
    assert!(sparse_dir.is_dir());

    let from_file = load_tensor(&file).unwrap();
    let from_dir = load_tensor(&sparse_dir).unwrap();
    assert_eq!(from_file, from_dir);
    assert_eq!(from_file.to_ndarray::<i16>().unwrap(), data);

    // Saving over an existing path of the other layout replaces it.
    save_tensor(&data, &sparse_dir, &small_chunks()).unwrap();
    assert!(sparse_dir.is_file());

    remove_urlpath(&file).unwrap();
    remove_urlpath(&sparse_dir).unwrap();
    remove_urlpath(&file).unwrap();
    assert!(!file.exists() && !sparse_dir.exists());
}

#[test]
fn test_failed_save_keeps_previous_contents() {
    let dir = tempdir().unwrap();
    let data = ArrayD::from_shape_fn(IxDyn(&[64]), |ix| ix[0] as i32 * 3);
    let bad_codec = PackParams {
        codec: CodecConfig {
            level: 12,
            ..CodecConfig::default()
        },
        ..small_chunks()
    };
    let zero_width = TensorBuffer {
        shape: vec![4],
        dtype: DType::Bytes(0),
        data: Vec::new(),
    };

    let file = dir.path().join("kept.tbk");
    save_tensor(&data, &file, &small_chunks()).unwrap();
    assert!(matches!(
        save_tensor(&data, &file, &bad_codec),
        Err(TambakError::InvalidParameter(_))
    ));
    assert!(save_tensor(&zero_width, &file, &small_chunks()).is_err());
    assert_eq!(load_tensor(&file).unwrap().to_ndarray::<i32>().unwrap(), data);

    let sparse_dir = dir.path().join("kept.d");
    let sparse = PackParams {
        contiguous: false,
        ..small_chunks()
    };
    save_tensor(&data, &sparse_dir, &sparse).unwrap();
    let bad_sparse = PackParams {
        contiguous: false,
        ..bad_codec
    };
    assert!(save_tensor(&data, &sparse_dir, &bad_sparse).is_err());
    assert_eq!(load_tensor(&sparse_dir).unwrap().to_ndarray::<i32>().unwrap(), data);
}

#[test]
fn test_legacy_single_blob() {
    let data = ArrayD::from_shape_fn(IxDyn(&[3000]), |ix| ix[0] as u64 % 17);
    let packed = pack_array(&data, &CodecConfig::default()).unwrap();
    let restored = unpack_array(&packed).unwrap();
    assert_eq!(restored.to_ndarray::<u64>().unwrap(), data);

    let chunked = pack_tensor(&data, &small_chunks()).unwrap();
    assert!(matches!(
        unpack_array(&chunked),
        Err(TambakError::FrameFormatError(_))
    ));
}

#[test]
fn test_missing_tensor_metadata() {
    let array = crate::array::NDArray::from_ndarray(
        &ArrayD::<f64>::zeros(IxDyn(&[4])),
        &crate::config::ArrayParams::default(),
    )
    .unwrap();
    let frame = array.to_frame().unwrap();
    assert!(matches!(
        unpack_tensor(&frame),
        Err(TambakError::MetadataKey(key)) if key == "dtype"
    ));
}
