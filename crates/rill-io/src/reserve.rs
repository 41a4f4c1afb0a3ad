/// Platform hook for a short-term CPU reservation while playback is blocked
/// on the network.
///
/// The embedded target grants the decode thread an extra CPU share so buffer
/// fills recover faster; hosts without such a facility use [`NoopReserve`].
/// `raise`/`release` calls are balanced by the reader.
pub trait CpuReserve: Send + Sync {
    fn raise(&self);
    fn release(&self);
}

/// No-op reservation for platforms without a CPU-limit facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReserve;

impl CpuReserve for NoopReserve {
    fn raise(&self) {}
    fn release(&self) {}
}
