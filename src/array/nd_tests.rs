use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;

use crate::array::{NDArray, Region, Slice};
use crate::config::ArrayParams;
use crate::error::TambakError;
use crate::types::{DType, ScalarKind};

fn grid_array(rows: usize, cols: usize) -> ArrayD<i64> {
    ArrayD::from_shape_fn(IxDyn(&[rows, cols]), |ix| (ix[0] * 100 + ix[1]) as i64)
}

fn params() -> ArrayParams {
    ArrayParams::default().chunks(&[4, 3]).blocks(&[2, 3])
}

#[test]
fn test_ndarray_roundtrip_with_edge_chunks() {
    let source = grid_array(10, 7);
    let array = NDArray::from_ndarray(&source, &params()).unwrap();
    assert_eq!(array.nchunks(), 9);
    assert_eq!(array.shape(), &[10, 7]);
    assert_eq!(array.to_ndarray::<i64>().unwrap(), source);
}

#[test]
fn test_strided_region_read() {
    let array = NDArray::from_ndarray(&grid_array(10, 7), &params()).unwrap();
    let region = Region::new(vec![
        Slice::new(Some(1), Some(9), 3),
        Slice::new(None, None, -2),
    ]);
    let got = array.read::<i64>(&region).unwrap();

    let rows = [1usize, 4, 7];
    let cols = [6usize, 4, 2, 0];
    let expected = ArrayD::from_shape_fn(IxDyn(&[3, 4]), |ix| {
        (rows[ix[0]] * 100 + cols[ix[1]]) as i64
    });
    assert_eq!(got, expected);
}

#[test]
fn test_region_read_clips_to_shape() {
    let array = NDArray::from_ndarray(&grid_array(10, 7), &params()).unwrap();
    let buffer = array
        .read_region(&Region::new(vec![Slice::range(8, 50)]))
        .unwrap();
    assert_eq!(buffer.shape, vec![2, 7]);
    assert_eq!(buffer.to_vec::<i64>().unwrap()[0], 800);
}

#[test]
fn test_write_region_touches_each_chunk_once() {
    let array = NDArray::zeros(&[10, 7], DType::Scalar(ScalarKind::Int64), &params()).unwrap();
    let before = array.store().revision();

    // Rows 3..5 span chunk rows 0 and 1; columns 0..3 sit in chunk column 0.
    let patch = ArrayD::from_shape_fn(IxDyn(&[2, 3]), |ix| (ix[0] * 3 + ix[1] + 1) as i64);
    array
        .write(&Region::from_ranges(&[3..5, 0..3]), &patch)
        .unwrap();
    assert_eq!(array.store().revision() - before, 2);

    let back = array.read::<i64>(&Region::from_ranges(&[3..5, 0..3])).unwrap();
    assert_eq!(back, patch);
    let untouched = array.read::<i64>(&Region::from_ranges(&[5..10, 0..7])).unwrap();
    assert!(untouched.iter().all(|&v| v == 0));
}

#[test]
fn test_single_element_fills_region() {
    let array = NDArray::zeros(&[6, 6], DType::Scalar(ScalarKind::Float32), &ArrayParams::default().chunks(&[4, 4])).unwrap();
    array
        .write_region(&Region::new(vec![Slice::new(None, None, 2)]), &2.5f32.to_le_bytes())
        .unwrap();
    let values = array.to_ndarray::<f32>().unwrap();
    for ((r, _), v) in values.indexed_iter().map(|(ix, v)| ((ix[0], ix[1]), *v)) {
        assert_eq!(v, if r % 2 == 0 { 2.5 } else { 0.0 });
    }
}

#[test]
fn test_write_errors_are_structural() {
    let array = NDArray::zeros(&[4, 4], DType::Scalar(ScalarKind::Int32), &ArrayParams::default()).unwrap();
    let wrong_type = ArrayD::<f64>::zeros(IxDyn(&[2, 2]));
    assert!(matches!(
        array.write(&Region::from_ranges(&[0..2, 0..2]), &wrong_type),
        Err(TambakError::DTypeMismatch(_))
    ));
    assert!(matches!(
        array.write_region(&Region::new(vec![Slice::range(2, 9)]), &[0u8; 4]),
        Err(TambakError::IndexOutOfRange(_))
    ));
    assert!(matches!(
        array.write_region(&Region::from_ranges(&[0..2, 0..2]), &[0u8; 12]),
        Err(TambakError::ShapeMismatch(_))
    ));
    assert!(matches!(
        NDArray::from_bytes(&[0u8; 10], &[4], DType::Scalar(ScalarKind::Int32), &ArrayParams::default()),
        Err(TambakError::ShapeMismatch(_))
    ));
}

#[test]
fn test_frame_and_sparse_persistence() {
    let source = grid_array(10, 7);
    let array = NDArray::from_ndarray(&source, &params()).unwrap();

    let restored = NDArray::from_frame(&array.to_frame().unwrap()).unwrap();
    assert_eq!(restored.chunks(), &[4, 3]);
    assert_eq!(restored.blocks(), &[2, 3]);
    assert_eq!(restored.to_ndarray::<i64>().unwrap(), source);

    let dir = tempfile::tempdir().unwrap();
    array.save_sparse(dir.path()).unwrap();
    let reopened = NDArray::open_sparse(dir.path()).unwrap();
    assert_eq!(reopened.to_ndarray::<i64>().unwrap(), source);
}

#[test]
fn test_structured_field_view() {
    let dtype = DType::structured(vec![
        ("id", DType::Scalar(ScalarKind::Int32)),
        ("score", DType::Scalar(ScalarKind::Float64)),
    ])
    .unwrap();
    let mut bytes = Vec::new();
    for i in 0..20i32 {
        bytes.extend_from_slice(&i.to_le_bytes());
        bytes.extend_from_slice(&(i as f64 * 0.5).to_le_bytes());
    }
    let array = Arc::new(
        NDArray::from_bytes(&bytes, &[20], dtype, &ArrayParams::default().chunks(&[6])).unwrap(),
    );
    assert_eq!(array.fields(), vec!["id", "score"]);

    let score = array.field("score").unwrap();
    assert_eq!(score.shape(), &[20]);
    let values = score.read::<f64>(&Region::from_ranges(&[4..8])).unwrap();
    assert_eq!(values.into_raw_vec_and_offset().0, vec![2.0, 2.5, 3.0, 3.5]);
    assert!(matches!(
        array.field("missing"),
        Err(TambakError::DTypeMismatch(_))
    ));
    assert!(score.read::<i32>(&Region::full()).is_err());
}

#[test]
fn test_zero_dimensional_array() {
    let scalar = ArrayD::from_elem(IxDyn(&[]), 42u16);
    let array = NDArray::from_ndarray(&scalar, &ArrayParams::default()).unwrap();
    assert_eq!(array.nchunks(), 1);
    assert_eq!(array.to_ndarray::<u16>().unwrap(), scalar);
}
