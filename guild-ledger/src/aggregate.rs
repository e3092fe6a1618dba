//! Read-side folds over committed entries
//!
//! Nothing here touches storage. Callers hand in amounts or rows pulled from
//! the store and get back totals or a ranked leaderboard. Every call starts
//! from scratch; no state is kept between calls.

use crate::types::{AccountId, Entry, Standing};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Sum of signed amounts
pub fn total<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().fold(Decimal::ZERO, |acc, amount| acc + amount)
}

/// Running total after each entry, in the order given
pub fn running_totals<'a, I>(entries: I) -> impl Iterator<Item = (&'a Entry, Decimal)>
where
    I: IntoIterator<Item = &'a Entry>,
{
    entries.into_iter().scan(Decimal::ZERO, |acc, entry| {
        *acc += entry.amount;
        Some((entry, *acc))
    })
}

/// Collapse rows grouped by account into one total per account
///
/// Rows for the same account must be adjacent (the account index yields them
/// that way).
pub fn per_account<I>(rows: I) -> PerAccount<I::IntoIter>
where
    I: IntoIterator<Item = (AccountId, Decimal)>,
{
    PerAccount {
        rows: rows.into_iter().peekable(),
    }
}

/// Iterator returned by [`per_account`]
#[derive(Debug)]
pub struct PerAccount<I: Iterator<Item = (AccountId, Decimal)>> {
    rows: std::iter::Peekable<I>,
}

impl<I> Iterator for PerAccount<I>
where
    I: Iterator<Item = (AccountId, Decimal)>,
{
    type Item = Standing;

    fn next(&mut self) -> Option<Standing> {
        let (account_id, mut sum) = self.rows.next()?;
        while let Some((_, amount)) = self.rows.next_if(|(next, _)| *next == account_id) {
            sum += amount;
        }
        Some(Standing {
            account_id,
            total: sum,
        })
    }
}

/// Leaderboard order: highest total first, then lowest account id
pub fn standing_order(a: &Standing, b: &Standing) -> Ordering {
    b.total
        .cmp(&a.total)
        .then_with(|| a.account_id.cmp(&b.account_id))
}

/// Ranked snapshot of a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Leaderboard {
    standings: Vec<Standing>,
}

impl Leaderboard {
    /// Rank the given standings
    pub fn new<I>(standings: I) -> Self
    where
        I: IntoIterator<Item = Standing>,
    {
        let mut standings: Vec<Standing> = standings.into_iter().collect();
        standings.sort_by(standing_order);
        Self { standings }
    }

    /// Build from account-grouped rows
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (AccountId, Decimal)>,
    {
        Self::new(per_account(rows))
    }

    /// First `limit` standings; may be iterated any number of times
    pub fn top(&self, limit: usize) -> impl Iterator<Item = &Standing> + Clone + '_ {
        self.standings.iter().take(limit)
    }

    /// Number of ranked accounts
    pub fn len(&self) -> usize {
        self.standings.len()
    }

    /// Whether no account has entries
    pub fn is_empty(&self) -> bool {
        self.standings.is_empty()
    }

    /// Sum over every account in the scope
    pub fn scope_total(&self) -> Decimal {
        total(self.standings.iter().map(|standing| standing.total))
    }
}

impl IntoIterator for Leaderboard {
    type Item = Standing;
    type IntoIter = std::vec::IntoIter<Standing>;

    fn into_iter(self) -> Self::IntoIter {
        self.standings.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(account: u64, cents: i64) -> (AccountId, Decimal) {
        (AccountId::new(account), Decimal::new(cents, 2))
    }

    #[test]
    fn test_total_empty_is_zero() {
        assert_eq!(total(Vec::new()), Decimal::ZERO);
    }

    #[test]
    fn test_per_account_collapses_adjacent_rows() {
        let standings: Vec<Standing> =
            per_account(vec![row(1, 100), row(1, -40), row(2, 5), row(3, 0)]).collect();

        assert_eq!(standings.len(), 3);
        assert_eq!(standings[0].total, Decimal::new(60, 2));
        assert_eq!(standings[1].account_id, AccountId::new(2));
        assert_eq!(standings[2].total, Decimal::ZERO);
    }

    #[test]
    fn test_leaderboard_ties_break_on_account_id() {
        let board = Leaderboard::from_rows(vec![
            row(7, 5000),
            row(3, 5000),
            row(9, 9000),
            row(1, 100),
        ]);

        let order: Vec<u64> = board.top(10).map(|s| s.account_id.get()).collect();
        assert_eq!(order, vec![9, 3, 7, 1]);
    }

    #[test]
    fn test_top_is_restartable_and_bounded() {
        let board = Leaderboard::from_rows(vec![row(1, 300), row(2, 200), row(3, 100)]);
        let top = board.top(2);

        let first: Vec<_> = top.clone().collect();
        let second: Vec<_> = top.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(board.top(0).count(), 0);
        assert_eq!(board.scope_total(), Decimal::new(600, 2));
    }
}
