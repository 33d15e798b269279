/// Storage layer for seglog
///
/// This module provides the segment storage engine of an append-only
/// commit log.
///
/// Components (leaves first):
/// - Store: append-only file of length-prefixed records
/// - Index: memory-mapped file of fixed-width offset → position entries
/// - Mmap: the owned read-write mapping the Index sits on
/// - Segment: one Store + one Index sharing a base offset
/// - SegmentView: read-only snapshot of a segment's files, for inspection
///
/// Not in this crate:
/// - The log that owns many segments and rolls over between them
pub mod index;
pub mod mmap;
pub mod segment;
pub mod store;
pub mod view;
