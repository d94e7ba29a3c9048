//! Seeded random transfers.

use byzshard_types::{AccountId, Transaction};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Generates transfers between a fixed set of accounts.
///
/// The same seed always yields the same sequence.
#[derive(Debug)]
pub struct Workload {
    rng: ChaCha8Rng,
    accounts: Vec<AccountId>,
    max_amount: u64,
    prefix: String,
    next: u64,
}

impl Workload {
    /// Transfers among `accounts` of at most `max_amount` each.
    pub fn new(seed: u64, accounts: Vec<AccountId>, max_amount: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            accounts,
            max_amount: max_amount.max(1),
            prefix: format!("w{}", seed),
            next: 0,
        }
    }

    /// Next transfer; sender and receiver always differ when possible.
    pub fn next_txn(&mut self) -> Transaction {
        let sender = self.accounts[self.rng.gen_range(0..self.accounts.len())];
        let mut receiver = self.accounts[self.rng.gen_range(0..self.accounts.len())];
        if self.accounts.len() > 1 {
            while receiver == sender {
                receiver = self.accounts[self.rng.gen_range(0..self.accounts.len())];
            }
        }
        let amount = self.rng.gen_range(1..=self.max_amount);
        self.next += 1;
        Transaction::new(
            format!("{}-{}", self.prefix, self.next),
            sender,
            receiver,
            amount,
        )
    }

    /// The next `n` transfers.
    pub fn batch(&mut self, n: usize) -> Vec<Transaction> {
        (0..n).map(|_| self.next_txn()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> Vec<AccountId> {
        (1..=5).map(AccountId).collect()
    }

    #[test]
    fn test_same_seed_same_transfers() {
        let key = |t: &Transaction| (t.id.clone(), t.sender, t.receiver, t.amount);
        let a: Vec<_> = Workload::new(7, accounts(), 30).batch(20).iter().map(key).collect();
        let b: Vec<_> = Workload::new(7, accounts(), 30).batch(20).iter().map(key).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_transfers_stay_in_bounds() {
        for txn in Workload::new(3, accounts(), 30).batch(100) {
            assert_ne!(txn.sender, txn.receiver);
            assert!((1..=30).contains(&txn.amount));
            assert!(txn.digest_matches());
        }
    }
}
