pub mod error;
pub mod model;
pub mod store;

#[cfg(test)]
pub(crate) mod test_util;

use store::Transaction;

/// A validated input that knows how to persist itself within a transaction.
pub trait Write {
    type Returns;

    /// # Errors
    /// Any domain error; the enclosing transaction rolls back on `Err`.
    fn write(self, txn: &mut Transaction) -> error::Result<Self::Returns>;
}

pub trait FetchById: Sized {
    type Id;

    /// # Errors
    /// Returns [`error::Error::RecordNotFound`] when no record has this id.
    fn fetch_by_id(id: &Self::Id, txn: &Transaction) -> error::Result<Self>;
}
