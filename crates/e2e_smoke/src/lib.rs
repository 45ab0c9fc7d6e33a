//! End-to-end smoke tests for the mama service live under `tests/`.
