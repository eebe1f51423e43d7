use ndarray::ArrayD;
use std::ops::Range;
use std::sync::Arc;

use crate::array::buffer::{check_kind, Buffer};
use crate::array::nd::NDArray;
use crate::array::region::{Region, Selection};
use crate::error::Result;
use crate::traits::Element;
use crate::types::{DType, Field};

/// A read-only view of one field of a structured array. Shares the parent.
#[derive(Debug, Clone)]
pub struct FieldView {
    parent: Arc<NDArray>,
    field: Field,
}

impl FieldView {
    /// Fails with `DTypeMismatch` if the parent has no field `name`.
    pub fn new(parent: Arc<NDArray>, name: &str) -> Result<Self> {
        let field = parent.dtype().field(name)?.clone();
        Ok(Self { parent, field })
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn dtype(&self) -> &DType {
        &self.field.dtype
    }

    pub fn shape(&self) -> &[usize] {
        self.parent.shape()
    }

    pub fn parent(&self) -> &Arc<NDArray> {
        &self.parent
    }

    /// Reads a region of this field. Sibling fields are never copied out of
    /// the decompressed blocks.
    pub fn read_region(&self, region: &Region) -> Result<Buffer> {
        let sel = region.resolve(self.parent.shape())?;
        let data = self.read_selection(&sel)?;
        Buffer::new(sel.shape(), self.field.dtype.clone(), data)
    }

    pub fn read<T: Element>(&self, region: &Region) -> Result<ArrayD<T>> {
        check_kind::<T>(&self.field.dtype)?;
        self.read_region(region)?.to_ndarray()
    }

    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        self.read(&Region::full())
    }

    /// Reads the unit-step box `bbox` of this field.
    pub(crate) fn read_box(&self, bbox: &[Range<usize>]) -> Result<Vec<u8>> {
        self.read_selection(&Region::from_ranges(bbox).resolve(self.parent.shape())?)
    }

    fn read_selection(&self, sel: &Selection) -> Result<Vec<u8>> {
        self.parent
            .read_projected(sel, self.field.offset, self.field.dtype.itemsize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Slice;
    use crate::config::ArrayParams;
    use crate::types::ScalarKind;

    fn records() -> Arc<NDArray> {
        let dtype = DType::structured(vec![
            ("id", DType::Scalar(ScalarKind::UInt16)),
            ("weight", DType::Scalar(ScalarKind::Float32)),
            ("label", DType::Bytes(6)),
        ])
        .unwrap();
        let mut bytes = Vec::new();
        for i in 0..40u16 {
            bytes.extend_from_slice(&i.to_le_bytes());
            bytes.extend_from_slice(&(i as f32 * 1.5).to_le_bytes());
            bytes.extend_from_slice(format!("row{:03}", i).as_bytes());
        }
        Arc::new(
            NDArray::from_bytes(&bytes, &[8, 5], dtype, &ArrayParams::default().chunks(&[3, 2]))
                .unwrap(),
        )
    }

    #[test]
    fn test_field_read_copies_only_field_bytes() {
        let parent = records();
        let weight = parent.field("weight").unwrap();
        let region = Region::new(vec![Slice::range(2, 7), Slice::new(None, None, 2)]);

        let buffer = weight.read_region(&region).unwrap();
        assert_eq!(buffer.shape, vec![5, 3]);
        assert_eq!(buffer.data.len(), 5 * 3 * 4);

        let values = weight.read::<f32>(&region).unwrap();
        for ((r, c), v) in (2..7).flat_map(|r| [0, 2, 4].map(|c| (r, c))).zip(values.iter()) {
            assert_eq!(*v, (r * 5 + c) as f32 * 1.5);
        }
    }

    #[test]
    fn test_trailing_bytes_field() {
        let parent = records();
        let label = parent.field("label").unwrap();
        let bytes = label.read_box(&[7..8, 3..5]).unwrap();
        assert_eq!(bytes, b"row038row039");

        let id = parent.field("id").unwrap();
        assert_eq!(id.read_box(&[0..1, 0..3]).unwrap(), vec![0, 0, 1, 0, 2, 0]);
    }
}
