pub mod mvcc;
