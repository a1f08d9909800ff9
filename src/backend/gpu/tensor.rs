//! Device tensors. Rank 4 data is stored channel-first (NCHW).

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::device::{DeviceBuffer, GpuDevice};
use crate::backend::{Tensor, TensorInfo};
use crate::error::{backend_err, AllocationError, ForgeResult};
use crate::graph::Layout;

#[derive(Debug)]
pub struct GpuTensor {
    info: TensorInfo,
    backend: String,
    device: Arc<GpuDevice>,
    buffer: OnceCell<DeviceBuffer>,
}

impl GpuTensor {
    pub fn new(backend: impl Into<String>, device: Arc<GpuDevice>, info: TensorInfo) -> Self {
        Self {
            info,
            backend: backend.into(),
            device,
            buffer: OnceCell::new(),
        }
    }

    pub(crate) fn allocate(&self) -> ForgeResult<usize> {
        if self.buffer.get().is_some() {
            return Err(AllocationError::AlreadyAllocated(self.backend.clone()).into());
        }
        let buffer = self.device.allocate(self.info.num_elements())?;
        let bytes = buffer.bytes();
        let _ = self.buffer.set(buffer);
        Ok(bytes)
    }

    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.device
    }

    pub(crate) fn buffer(&self) -> ForgeResult<&DeviceBuffer> {
        self.buffer
            .get()
            .ok_or_else(|| AllocationError::NotPrepared(self.backend.clone()).into())
    }
}

impl Tensor for GpuTensor {
    fn info(&self) -> &TensorInfo {
        &self.info
    }

    fn layout(&self) -> Layout {
        Layout::Nchw
    }

    fn backend(&self) -> &str {
        &self.backend
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn read(&self) -> ForgeResult<Vec<f32>> {
        let buffer = self.buffer()?;
        self.device.synchronize()?;
        let data = buffer.load().map_err(|e| backend_err(&self.backend, e))?;
        Ok(data.clone())
    }

    /// Queued behind all previously submitted work.
    fn write(&self, data: &[f32]) -> ForgeResult<()> {
        let buffer = self.buffer()?.clone();
        if buffer.len() != data.len() {
            return Err(backend_err(
                &self.backend,
                format!("write of {} elements into a tensor of {}", data.len(), buffer.len()),
            ));
        }
        let host = data.to_vec();
        self.device.enqueue("copy host to device", move || {
            buffer.store()?.copy_from_slice(&host);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataType, Shape, TypeInfo};

    #[test]
    fn test_logical_round_trip_through_nchw() {
        let device = Arc::new(GpuDevice::new(None).unwrap());
        let info = TensorInfo::new(Shape::new(vec![1, 2, 2, 2]), TypeInfo::new(DataType::Float32));
        let tensor = GpuTensor::new("gpu", device, info);
        tensor.allocate().unwrap();

        let logical: Vec<f32> = (0..8).map(|v| v as f32).collect();
        tensor.write_logical(&logical).unwrap();

        // channel 0 first, then channel 1
        assert_eq!(tensor.read().unwrap(), vec![0.0, 2.0, 4.0, 6.0, 1.0, 3.0, 5.0, 7.0]);
        assert_eq!(tensor.read_logical().unwrap(), logical);
    }

    #[test]
    fn test_access_before_allocate() {
        let device = Arc::new(GpuDevice::new(None).unwrap());
        let info = TensorInfo::new(Shape::new(vec![2]), TypeInfo::new(DataType::Float32));
        let tensor = GpuTensor::new("gpu", device, info);
        assert!(tensor.read().is_err());
        assert!(tensor.write(&[0.0, 0.0]).is_err());
    }
}
