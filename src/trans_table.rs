use std::collections::BTreeMap;

use crate::message::{Method, Transaction};

/// A CSeq-keyed transaction table.
///
/// Semantically this is "ordered by CSeq, supports forward and reverse
/// iteration, lookup by CSeq, erase by key" — since CSeq is monotonically
/// increasing within a dialog direction, ordering by key is equivalent to
/// insertion order, so a plain `BTreeMap` satisfies the contract without a
/// separate insertion-order index.
#[derive(Debug, Clone, Default)]
pub struct TransactionTable<Token>(BTreeMap<u32, Transaction<Token>>);

impl<Token> TransactionTable<Token> {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, trans: Transaction<Token>) {
        self.0.insert(trans.cseq, trans);
    }

    pub fn get(&self, cseq: u32) -> Option<&Transaction<Token>> {
        self.0.get(&cseq)
    }

    pub fn remove(&mut self, cseq: u32) -> Option<Transaction<Token>> {
        self.0.remove(&cseq)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, cseq: u32) -> bool {
        self.0.contains_key(&cseq)
    }

    /// Find the most recently inserted transaction with the given method,
    /// i.e. the highest CSeq. Used by `cancel()` to find the pending INVITE.
    pub fn find_last_by_method(&self, method: &Method) -> Option<&Transaction<Token>> {
        self.0.values().rev().find(|t| &t.method == method)
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &Transaction<Token>> {
        self.0.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(cseq: u32, method: Method) -> Transaction<()> {
        Transaction::new(method, cseq, ())
    }

    #[test]
    fn find_last_by_method_picks_highest_cseq() {
        let mut tbl = TransactionTable::new();
        tbl.insert(t(5, Method::Invite));
        tbl.insert(t(7, Method::Bye));
        tbl.insert(t(9, Method::Invite));
        let found = tbl.find_last_by_method(&Method::Invite).unwrap();
        assert_eq!(found.cseq, 9);
    }

}
