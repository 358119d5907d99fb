//! Workspace-level integration tests for mempool-core live under `tests/`.
