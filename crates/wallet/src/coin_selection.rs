//! Coin selection: branch-and-bound for changeless solutions, knapsack as the fallback.
//!
//! Everything here is pure. Callers build [`OutputGroup`]s from the wallet's spendable
//! outputs with [`group_outputs`] and run [`select_coins_min_conf`] once per
//! [`EligibilityFilter`] in their confirmation cascade.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use yupost_consensus::money::{Amount, CENT, MAX_MONEY};
use yupost_primitives::{Destination, OutPoint, TxOut};

use crate::coin_control::SpendableOutput;
use crate::fees::FeeRate;

/// Depth-first search budget for branch-and-bound.
pub const TOTAL_TRIES: usize = 100_000;
/// Knapsack aims to leave at least this much change.
pub const MIN_CHANGE: Amount = CENT;
/// Change is never reduced below this when bumping the fee into it.
pub const MIN_FINAL_CHANGE: Amount = MIN_CHANGE / 2;
/// Outputs of one destination beyond this count spill into a new group.
pub const OUTPUT_GROUP_MAX_ENTRIES: usize = 10;
const KNAPSACK_ITERATIONS: usize = 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputCoin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    /// Value minus the fee to spend it at the effective rate.
    pub effective_value: Amount,
    pub input_bytes: usize,
}

impl InputCoin {
    pub fn new(outpoint: OutPoint, txout: TxOut, input_bytes: usize) -> Self {
        let effective_value = txout.value;
        Self {
            outpoint,
            txout,
            effective_value,
            input_bytes,
        }
    }

    pub fn value(&self) -> Amount {
        self.txout.value
    }
}

/// Coins that are spent together: every coin of one address when avoiding partial spends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputGroup {
    pub outputs: Vec<InputCoin>,
    pub from_me: bool,
    pub value: Amount,
    pub depth: i32,
    pub ancestors: usize,
    pub effective_value: Amount,
    pub fee: Amount,
    pub long_term_fee: Amount,
}

impl Default for OutputGroup {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
            from_me: true,
            value: 0,
            depth: 999,
            ancestors: 0,
            effective_value: 0,
            fee: 0,
            long_term_fee: 0,
        }
    }
}

impl OutputGroup {
    pub fn insert(&mut self, coin: InputCoin, depth: i32, from_me: bool, ancestors: usize) {
        self.from_me &= from_me;
        self.value += coin.value();
        self.effective_value += coin.effective_value;
        self.depth = self.depth.min(depth);
        self.ancestors += ancestors;
        self.outputs.push(coin);
    }

    pub fn eligible_for_spending(&self, filter: &EligibilityFilter) -> bool {
        let required = if self.from_me {
            filter.conf_mine
        } else {
            filter.conf_theirs
        };
        self.depth >= required && self.ancestors <= filter.max_ancestors
    }

    /// A copy valued at `effective` fees, dropping coins that cost more than they hold.
    pub fn with_fees(&self, effective: FeeRate, long_term: FeeRate) -> OutputGroup {
        let mut group = self.clone();
        group.outputs.clear();
        group.value = 0;
        group.effective_value = 0;
        group.fee = 0;
        group.long_term_fee = 0;
        for coin in &self.outputs {
            let fee = effective.fee(coin.input_bytes);
            let effective_value = coin.value() - fee;
            if effective_value <= 0 {
                continue;
            }
            let mut coin = coin.clone();
            coin.effective_value = effective_value;
            group.fee += fee;
            group.long_term_fee += long_term.fee(coin.input_bytes);
            group.value += coin.value();
            group.effective_value += effective_value;
            group.outputs.push(coin);
        }
        group
    }

    fn input_bytes(&self) -> usize {
        self.outputs.iter().map(|coin| coin.input_bytes).sum()
    }
}

/// Minimum depths for our own and for foreign coins, and an ancestor cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EligibilityFilter {
    pub conf_mine: i32,
    pub conf_theirs: i32,
    pub max_ancestors: usize,
}

impl EligibilityFilter {
    pub const fn new(conf_mine: i32, conf_theirs: i32, max_ancestors: usize) -> Self {
        Self {
            conf_mine,
            conf_theirs,
            max_ancestors,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionParams {
    pub use_bnb: bool,
    pub change_output_size: usize,
    pub change_spend_size: usize,
    pub effective_fee: FeeRate,
    pub long_term_fee: FeeRate,
    pub discard_fee: FeeRate,
    /// Size of the transaction without inputs.
    pub tx_noinputs_size: usize,
}

impl SelectionParams {
    pub fn cost_of_change(&self) -> Amount {
        self.discard_fee.fee(self.change_spend_size) + self.effective_fee.fee(self.change_output_size)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub coins: Vec<InputCoin>,
    /// Sum of the selected coins' face values.
    pub value: Amount,
    pub bnb_used: bool,
}

impl Selection {
    pub fn input_bytes(&self) -> usize {
        self.coins.iter().map(|coin| coin.input_bytes).sum()
    }
}

/// Groups spendable outputs by destination, or one group per output when `separate_coins`.
pub fn group_outputs(outputs: &[SpendableOutput], separate_coins: bool) -> Vec<OutputGroup> {
    let mut groups = Vec::new();
    let usable = outputs.iter().filter_map(|output| {
        let input_bytes = output.input_bytes?;
        output.spendable.then(|| {
            (
                output,
                InputCoin::new(output.outpoint, output.txout.clone(), input_bytes),
            )
        })
    });
    if separate_coins {
        for (output, coin) in usable {
            let mut group = OutputGroup::default();
            group.insert(coin, output.depth, output.from_me, output.ancestors);
            groups.push(group);
        }
        return groups;
    }

    let mut by_destination: BTreeMap<Option<Destination>, OutputGroup> = BTreeMap::new();
    for (output, coin) in usable {
        let destination = output.destination();
        if by_destination
            .get(&destination)
            .is_some_and(|group| group.outputs.len() >= OUTPUT_GROUP_MAX_ENTRIES)
        {
            if let Some(full) = by_destination.remove(&destination) {
                groups.push(full);
            }
        }
        by_destination.entry(destination).or_default().insert(
            coin,
            output.depth,
            output.from_me,
            output.ancestors,
        );
    }
    groups.extend(by_destination.into_values());
    groups
}

/// Depth-first search for a subset whose effective value lands in
/// `[target + not_input_fees, target + not_input_fees + cost_of_change]`, minimising waste.
/// Ties go to fewer inputs, then fewer input bytes.
pub fn select_coins_bnb(
    pool: &[OutputGroup],
    target: Amount,
    cost_of_change: Amount,
    not_input_fees: Amount,
) -> Option<Selection> {
    let actual_target = not_input_fees + target;
    let mut pool: Vec<&OutputGroup> = pool.iter().collect();
    let mut available: Amount = pool.iter().map(|group| group.effective_value).sum();
    if available < actual_target {
        return None;
    }
    pool.sort_by(|a, b| b.effective_value.cmp(&a.effective_value));

    let mut current: Vec<bool> = Vec::with_capacity(pool.len());
    let mut current_value: Amount = 0;
    let mut current_waste: Amount = 0;
    let mut best: Option<(Vec<bool>, Amount, usize, usize)> = None;
    let mut best_waste = MAX_MONEY;
    let timing_positive = pool
        .first()
        .is_some_and(|group| group.fee - group.long_term_fee > 0);

    for _ in 0..TOTAL_TRIES {
        let mut backtrack = false;
        if current_value + available < actual_target
            || current_value > actual_target + cost_of_change
            || (current_waste > best_waste && timing_positive)
        {
            backtrack = true;
        } else if current_value >= actual_target {
            let waste = current_waste + (current_value - actual_target);
            let (inputs, bytes) = selected_shape(&pool, &current);
            let better = match &best {
                None => true,
                Some((_, waste_best, inputs_best, bytes_best)) => {
                    (waste, inputs, bytes) < (*waste_best, *inputs_best, *bytes_best)
                }
            };
            if better {
                let mut selection = current.clone();
                selection.resize(pool.len(), false);
                best = Some((selection, waste, inputs, bytes));
                best_waste = waste;
            }
            backtrack = true;
        }

        if backtrack {
            while current.last() == Some(&false) {
                current.pop();
                available += pool[current.len()].effective_value;
            }
            let Some(last) = current.last_mut() else {
                break;
            };
            *last = false;
            let group = pool[current.len() - 1];
            current_value -= group.effective_value;
            current_waste -= group.fee - group.long_term_fee;
        } else {
            let index = current.len();
            let group = pool[index];
            available -= group.effective_value;
            let skip_equivalent = index > 0
                && current.last() == Some(&false)
                && group.effective_value == pool[index - 1].effective_value
                && group.fee == pool[index - 1].fee;
            if skip_equivalent {
                current.push(false);
            } else {
                current.push(true);
                current_value += group.effective_value;
                current_waste += group.fee - group.long_term_fee;
            }
        }
    }

    let (selection, ..) = best?;
    let mut coins = Vec::new();
    let mut value = 0;
    for (group, _) in pool.iter().zip(selection).filter(|(_, chosen)| *chosen) {
        value += group.value;
        coins.extend(group.outputs.iter().cloned());
    }
    Some(Selection {
        coins,
        value,
        bnb_used: true,
    })
}

fn selected_shape(pool: &[&OutputGroup], selection: &[bool]) -> (usize, usize) {
    pool.iter()
        .zip(selection)
        .filter(|(_, chosen)| **chosen)
        .fold((0, 0), |(inputs, bytes), (group, _)| {
            (inputs + group.outputs.len(), bytes + group.input_bytes())
        })
}

fn approximate_best_subset<R: Rng + ?Sized>(
    groups: &[OutputGroup],
    total_lower: Amount,
    target: Amount,
    rng: &mut R,
) -> (Vec<bool>, Amount) {
    let mut best_included = vec![true; groups.len()];
    let mut best = total_lower;
    for _ in 0..KNAPSACK_ITERATIONS {
        if best == target {
            break;
        }
        let mut included = vec![false; groups.len()];
        let mut total: Amount = 0;
        let mut reached_target = false;
        for pass in 0..2 {
            if reached_target {
                break;
            }
            for (index, group) in groups.iter().enumerate() {
                let take = if pass == 0 {
                    rng.gen::<bool>()
                } else {
                    !included[index]
                };
                if !take {
                    continue;
                }
                total += group.value;
                included[index] = true;
                if total >= target {
                    reached_target = true;
                    if total < best {
                        best = total;
                        best_included = included.clone();
                    }
                    total -= group.value;
                    included[index] = false;
                }
            }
        }
    }
    (best_included, best)
}

/// Stochastic subset-sum over face values, preferring an exact match, then a total that
/// leaves at least [`MIN_CHANGE`], then the smallest single group above the target.
pub fn knapsack_solver<R: Rng + ?Sized>(
    groups: &[OutputGroup],
    target: Amount,
    rng: &mut R,
) -> Option<Selection> {
    let mut groups = groups.to_vec();
    groups.shuffle(rng);

    let mut applicable = Vec::new();
    let mut lowest_larger: Option<OutputGroup> = None;
    let mut total_lower: Amount = 0;
    for group in groups {
        if group.value == target {
            return Some(selection_of([&group], false));
        }
        if group.value < target + MIN_CHANGE {
            total_lower += group.value;
            applicable.push(group);
        } else if lowest_larger
            .as_ref()
            .map_or(true, |lowest| group.value < lowest.value)
        {
            lowest_larger = Some(group);
        }
    }

    if total_lower == target {
        return Some(selection_of(applicable.iter(), false));
    }
    if total_lower < target {
        return lowest_larger.map(|group| selection_of([&group], false));
    }

    applicable.sort_by(|a, b| b.value.cmp(&a.value));
    let (mut best_included, mut best) =
        approximate_best_subset(&applicable, total_lower, target, rng);
    if best != target && total_lower >= target + MIN_CHANGE {
        (best_included, best) =
            approximate_best_subset(&applicable, total_lower, target + MIN_CHANGE, rng);
    }

    if let Some(lowest) = lowest_larger {
        if (best != target && best < target + MIN_CHANGE) || lowest.value <= best {
            return Some(selection_of([&lowest], false));
        }
    }
    Some(selection_of(
        applicable
            .iter()
            .zip(best_included)
            .filter(|(_, chosen)| *chosen)
            .map(|(group, _)| group),
        false,
    ))
}

fn selection_of<'a>(groups: impl IntoIterator<Item = &'a OutputGroup>, bnb_used: bool) -> Selection {
    let mut coins = Vec::new();
    let mut value = 0;
    for group in groups {
        value += group.value;
        coins.extend(group.outputs.iter().cloned());
    }
    Selection {
        coins,
        value,
        bnb_used,
    }
}

/// One selection attempt over the groups passing `filter`.
pub fn select_coins_min_conf<R: Rng + ?Sized>(
    target: Amount,
    filter: &EligibilityFilter,
    groups: &[OutputGroup],
    params: &SelectionParams,
    rng: &mut R,
) -> Option<Selection> {
    let eligible = groups.iter().filter(|group| group.eligible_for_spending(filter));
    if params.use_bnb {
        let pool: Vec<OutputGroup> = eligible
            .map(|group| group.with_fees(params.effective_fee, params.long_term_fee))
            .filter(|group| group.effective_value > 0)
            .collect();
        let not_input_fees = params.effective_fee.fee(params.tx_noinputs_size);
        select_coins_bnb(&pool, target, params.cost_of_change(), not_input_fees)
    } else {
        let pool: Vec<OutputGroup> = eligible.cloned().collect();
        knapsack_solver(&pool, target, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use yupost_consensus::money::COIN;
    use yupost_primitives::address::p2pkh_script;

    fn group(value: Amount, seed: u8) -> OutputGroup {
        let mut group = OutputGroup::default();
        group.insert(
            InputCoin::new(
                OutPoint::new([seed; 32], 0),
                TxOut::new(value, p2pkh_script(&[seed; 20])),
                148,
            ),
            6,
            false,
            0,
        );
        group
    }

    fn pool(values: &[Amount]) -> Vec<OutputGroup> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| group(*value, index as u8 + 1))
            .collect()
    }

    fn values(selection: &Selection) -> Vec<Amount> {
        let mut values: Vec<Amount> = selection.coins.iter().map(InputCoin::value).collect();
        values.sort_unstable();
        values
    }

    #[test]
    fn bnb_finds_exact_match() {
        let groups = pool(&[COIN, 2 * COIN, 3 * COIN, 4 * COIN]);
        let selection = select_coins_bnb(&groups, 5 * COIN, 0, 0).expect("exact match");
        assert_eq!(selection.value, 5 * COIN);
        assert!(selection.bnb_used);
        assert_eq!(selection.coins.len(), 2);
    }

    #[test]
    fn bnb_prefers_fewer_inputs_on_equal_waste() {
        let groups = pool(&[COIN, 2 * COIN, 3 * COIN]);
        let selection = select_coins_bnb(&groups, 3 * COIN, 0, 0).expect("match");
        assert_eq!(values(&selection), vec![3 * COIN]);
    }

    #[test]
    fn bnb_fails_without_changeless_solution() {
        let groups = pool(&[4 * COIN, 7 * COIN]);
        assert!(select_coins_bnb(&groups, 5 * COIN, CENT, 0).is_none());
        assert!(select_coins_bnb(&groups, 20 * COIN, CENT, 0).is_none());
    }

    #[test]
    fn bnb_accepts_overshoot_within_cost_of_change() {
        let groups = pool(&[5 * COIN + 100, 9 * COIN]);
        let selection = select_coins_bnb(&groups, 5 * COIN, 200, 0).expect("match");
        assert_eq!(selection.value, 5 * COIN + 100);
    }

    #[test]
    fn knapsack_prefers_exact_then_lowest_larger() {
        let mut rng = StdRng::seed_from_u64(7);
        let groups = pool(&[CENT, 2 * CENT, 5 * COIN]);
        let exact = knapsack_solver(&groups, 3 * CENT, &mut rng).expect("exact");
        assert_eq!(exact.value, 3 * CENT);

        let larger = knapsack_solver(&groups, 4 * CENT, &mut rng).expect("larger");
        assert_eq!(values(&larger), vec![5 * COIN]);

        assert!(knapsack_solver(&pool(&[CENT]), 2 * CENT, &mut rng).is_none());
    }

    #[test]
    fn knapsack_leaves_min_change_when_possible() {
        let mut rng = StdRng::seed_from_u64(11);
        let groups = pool(&[5 * CENT, 6 * CENT, 7 * CENT, 8 * CENT, 20 * CENT]);
        let selection = knapsack_solver(&groups, 11 * CENT, &mut rng).expect("selection");
        assert_eq!(selection.value, 11 * CENT);
        let selection = knapsack_solver(&groups, 12 * CENT, &mut rng).expect("selection");
        assert!(selection.value == 12 * CENT || selection.value >= 13 * CENT);
    }

    #[test]
    fn eligibility_uses_min_depth_and_sender() {
        let mut mine = group(COIN, 1);
        mine.from_me = true;
        mine.depth = 1;
        let foreign = group(COIN, 2);
        let strict = EligibilityFilter::new(1, 6, 0);
        assert!(mine.eligible_for_spending(&strict));
        let mut shallow = foreign.clone();
        shallow.depth = 2;
        assert!(!shallow.eligible_for_spending(&strict));
        assert!(foreign.eligible_for_spending(&strict));
    }

    #[test]
    fn fees_drop_uneconomic_coins() {
        let rate = FeeRate::new(10_000);
        let dust = group(1_000, 1).with_fees(rate, rate);
        assert!(dust.outputs.is_empty());
        assert_eq!(dust.effective_value, 0);
        let coin = group(COIN, 2).with_fees(rate, FeeRate::new(1_000));
        assert_eq!(coin.fee, 1_480);
        assert_eq!(coin.long_term_fee, 148);
        assert_eq!(coin.effective_value, COIN - 1_480);
    }

    #[test]
    fn groups_split_at_max_entries() {
        let script = p2pkh_script(&[9u8; 20]);
        let outputs: Vec<SpendableOutput> = (0..(OUTPUT_GROUP_MAX_ENTRIES as u32 + 2))
            .map(|index| SpendableOutput {
                outpoint: OutPoint::new([1u8; 32], index),
                txout: TxOut::new(COIN, script.clone()),
                depth: 3 + index as i32,
                input_bytes: Some(148),
                spendable: true,
                solvable: true,
                safe: true,
                from_me: false,
                time: 0,
                ancestors: 0,
            })
            .collect();
        let grouped = group_outputs(&outputs, false);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].outputs.len(), OUTPUT_GROUP_MAX_ENTRIES);
        assert_eq!(grouped[0].depth, 3);
        assert_eq!(grouped[1].outputs.len(), 2);
        assert_eq!(group_outputs(&outputs, true).len(), outputs.len());
    }

    #[test]
    fn bnb_waste_never_exceeds_knapsack_waste() {
        let mut rng = StdRng::seed_from_u64(42);
        let zero = FeeRate::new(0);
        for _ in 0..50 {
            let count = rng.gen_range(2..10);
            let values: Vec<Amount> = (0..count).map(|_| rng.gen_range(1..50) * CENT).collect();
            let groups: Vec<OutputGroup> = pool(&values)
                .iter()
                .map(|group| group.with_fees(zero, zero))
                .collect();
            let total: Amount = values.iter().sum();
            let target = rng.gen_range(1..=total);
            let cost_of_change = CENT / 2;
            let Some(bnb) = select_coins_bnb(&groups, target, cost_of_change, 0) else {
                continue;
            };
            let knapsack = knapsack_solver(&groups, target, &mut rng).expect("funds suffice");
            assert!(bnb.value >= target);
            assert!(knapsack.value >= target);
            assert!(bnb.value - target <= knapsack.value - target);
        }
    }
}
