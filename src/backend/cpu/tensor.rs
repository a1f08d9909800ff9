//! Host tensors.

use std::any::Any;
use std::sync::{Arc, RwLock};

use crate::backend::{Tensor, TensorInfo};
use crate::error::{backend_err, ForgeResult};
use crate::graph::Layout;

/// Host memory in logical (NHWC) order.
#[derive(Debug)]
pub struct CpuTensor {
    info: TensorInfo,
    backend: String,
    data: Arc<RwLock<Vec<f32>>>,
}

impl CpuTensor {
    /// Unallocated tensor; storage is reserved by [`CpuTensor::allocate`].
    pub fn new(backend: impl Into<String>, info: TensorInfo) -> Self {
        Self {
            info,
            backend: backend.into(),
            data: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Zero-fill the storage; returns the bytes reserved.
    pub(crate) fn allocate(&self) -> ForgeResult<usize> {
        let elements = self.info.num_elements();
        let mut data = self.data.write()?;
        data.clear();
        data.resize(elements, 0.0);
        Ok(elements * std::mem::size_of::<f32>())
    }

    pub(crate) fn storage(&self) -> Arc<RwLock<Vec<f32>>> {
        Arc::clone(&self.data)
    }
}

impl Tensor for CpuTensor {
    fn info(&self) -> &TensorInfo {
        &self.info
    }

    fn layout(&self) -> Layout {
        Layout::Nhwc
    }

    fn backend(&self) -> &str {
        &self.backend
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read(&self) -> ForgeResult<Vec<f32>> {
        Ok(self.data.read()?.clone())
    }

    fn write(&self, data: &[f32]) -> ForgeResult<()> {
        let mut storage = self.data.write()?;
        if storage.len() != data.len() {
            return Err(backend_err(
                &self.backend,
                format!("write of {} elements into a tensor of {}", data.len(), storage.len()),
            ));
        }
        storage.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataType, Shape, TypeInfo};

    fn tensor(dims: Vec<usize>) -> CpuTensor {
        CpuTensor::new("cpu", TensorInfo::new(Shape::new(dims), TypeInfo::new(DataType::Float32)))
    }

    #[test]
    fn test_write_before_allocate_fails() {
        let t = tensor(vec![2]);
        assert!(t.write(&[1.0, 2.0]).is_err());
        assert_eq!(t.allocate().unwrap(), 8);
        t.write(&[1.0, 2.0]).unwrap();
        assert_eq!(t.read().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_logical_and_storage_order_agree() {
        let t = tensor(vec![1, 1, 2, 2]);
        t.allocate().unwrap();
        t.write_logical(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.read().unwrap(), t.read_logical().unwrap());
    }
}
