// src/communication.rs

/// Collective exchange primitive connecting the processes of a
/// distributed run. Messages are fixed-layout integer vectors; the
/// exchange acts as a barrier, so every rank submits its vector
/// before any rank proceeds.
///
/// The actual inter-process transport lives outside this crate; the
/// refinement coordinator only needs this seam.
pub trait Collective {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Number of participating processes.
    fn size(&self) -> usize;

    /// Gathers `local` from every rank; every rank receives the
    /// concatenation of all contributions, ordered by rank.
    fn allgather(&self, local: &[i64]) -> Vec<i64>;
}

/// Trivial single-process collective. The "exchange" is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCollective;

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allgather(&self, local: &[i64]) -> Vec<i64> {
        local.to_vec()
    }
}
