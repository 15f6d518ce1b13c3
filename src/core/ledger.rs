use super::types::{Account, AccountKind};

/// Per-account balances for one track. The last slot is an implicit cash
/// bucket for inflows that have no liquid account to land in.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    kinds: Vec<AccountKind>,
    balances: Vec<f64>,
}

impl Ledger {
    pub fn from_accounts(accounts: &[Account]) -> Self {
        let mut kinds: Vec<AccountKind> = accounts.iter().map(|a| a.kind).collect();
        let mut balances: Vec<f64> = accounts.iter().map(|a| a.balance.max(0.0)).collect();
        kinds.push(AccountKind::Cash);
        balances.push(0.0);
        Self { kinds, balances }
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn unallocated_slot(&self) -> usize {
        self.balances.len() - 1
    }

    pub fn unallocated(&self) -> f64 {
        self.balances[self.unallocated_slot()]
    }

    pub fn kind(&self, slot: usize) -> AccountKind {
        self.kinds[slot]
    }

    pub fn balance(&self, slot: usize) -> f64 {
        self.balances[slot]
    }

    pub fn total(&self) -> f64 {
        self.balances.iter().sum()
    }

    pub fn total_of(&self, kind: AccountKind) -> f64 {
        self.slots_of(kind).map(|slot| self.balances[slot]).sum()
    }

    /// Named account slots of `kind`, in plan order.
    pub fn slots_of(&self, kind: AccountKind) -> impl Iterator<Item = usize> + '_ {
        let named = self.unallocated_slot();
        (0..named).filter(move |&slot| self.kinds[slot] == kind)
    }

    pub fn first_of(&self, kind: AccountKind) -> Option<usize> {
        self.slots_of(kind).next()
    }

    pub fn credit(&mut self, slot: usize, amount: f64) {
        if amount > 0.0 {
            self.balances[slot] += amount;
        }
    }

    /// Removes up to `amount` from a slot and returns what was removed.
    pub fn debit(&mut self, slot: usize, amount: f64) -> f64 {
        let taken = amount.max(0.0).min(self.balances[slot]);
        self.balances[slot] -= taken;
        taken
    }

    /// Drains slots of `kind` in plan order until `amount` is taken.
    pub fn debit_kind(&mut self, kind: AccountKind, amount: f64) -> f64 {
        let slots: Vec<usize> = self.slots_of(kind).collect();
        let mut remaining = amount.max(0.0);
        for slot in slots {
            if remaining <= 0.0 {
                break;
            }
            remaining -= self.debit(slot, remaining);
        }
        amount.max(0.0) - remaining
    }

    /// Slot that receives windfalls and reinvested cash: brokerage, then
    /// cash, then the unallocated bucket.
    pub fn liquid_slot(&self) -> usize {
        self.first_of(AccountKind::Taxable)
            .or_else(|| self.first_of(AccountKind::Cash))
            .unwrap_or_else(|| self.unallocated_slot())
    }

    pub fn deposit_liquid(&mut self, amount: f64) -> usize {
        let slot = self.liquid_slot();
        self.credit(slot, amount);
        slot
    }

    /// Draws from cash accounts, the unallocated bucket and then brokerage at
    /// basis. Returns the amount actually drawn.
    pub fn debit_cash_like(&mut self, amount: f64) -> f64 {
        let mut remaining = amount.max(0.0);
        let order: Vec<usize> = self
            .slots_of(AccountKind::Cash)
            .chain(std::iter::once(self.unallocated_slot()))
            .chain(self.slots_of(AccountKind::Taxable))
            .collect();
        for slot in order {
            if remaining <= 0.0 {
                break;
            }
            remaining -= self.debit(slot, remaining);
        }
        amount.max(0.0) - remaining
    }

    /// Applies signed per-slot flows, floored at zero. A debit a slot cannot
    /// cover spills into the other slots in slot order; returns what could
    /// not be covered anywhere.
    pub fn apply_flows(&mut self, flows: &[f64]) -> f64 {
        let mut deficit = 0.0;
        for (slot, &flow) in flows.iter().enumerate() {
            if flow >= 0.0 {
                self.balances[slot] += flow;
            } else {
                deficit += -flow - self.debit(slot, -flow);
            }
        }
        for slot in 0..self.balances.len() {
            if deficit <= 0.0 {
                break;
            }
            deficit -= self.debit(slot, deficit);
        }
        deficit.max(0.0)
    }

    pub fn grow(&mut self, rates: &[f64]) {
        for (balance, rate) in self.balances.iter_mut().zip(rates) {
            *balance = (*balance * (1.0 + rate)).max(0.0);
        }
    }

    /// Signed per-slot difference `self - earlier`.
    pub fn flows_since(&self, earlier: &Ledger) -> Vec<f64> {
        self.balances
            .iter()
            .zip(&earlier.balances)
            .map(|(now, then)| now - then)
            .collect()
    }
}
