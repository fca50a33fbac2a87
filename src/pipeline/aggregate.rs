use std::collections::BTreeMap;

use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::statistic::{chunked_reduce, mean};
use crate::pipeline::types::{FlaggedTrip, GroupKey, WeeklyFact};

/// Per-group running sums. Merging two accumulators is associative and
/// commutative up to float rounding; callers merge in chunk order.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct GroupAccumulator {
    count: u64,
    trip_distance: f64,
    fare_amount: f64,
    total_amount: f64,
    extra: f64,
    mta_tax: f64,
    tip_amount: f64,
    improvement_surcharge: f64,
    generous: u64,
}

impl GroupAccumulator {
    fn push(&mut self, flagged: &FlaggedTrip) {
        let t = &flagged.trip;
        self.count += 1;
        self.trip_distance += t.trip_distance;
        self.fare_amount += t.fare_amount;
        self.total_amount += t.total_amount;
        self.extra += t.extra;
        self.mta_tax += t.mta_tax;
        self.tip_amount += t.tip_amount;
        self.improvement_surcharge += t.improvement_surcharge;
        self.generous += u64::from(flagged.generous);
    }

    fn merge(&mut self, other: &GroupAccumulator) {
        self.count += other.count;
        self.trip_distance += other.trip_distance;
        self.fare_amount += other.fare_amount;
        self.total_amount += other.total_amount;
        self.extra += other.extra;
        self.mta_tax += other.mta_tax;
        self.tip_amount += other.tip_amount;
        self.improvement_surcharge += other.improvement_surcharge;
        self.generous += other.generous;
    }

    /// Builds the fact row. `count` is never zero: a group only exists
    /// because a trip produced its key.
    fn finish(&self, key: GroupKey) -> WeeklyFact {
        let n = self.count as f64;
        WeeklyFact {
            vendor_id: key.vendor_id,
            trip_type: key.trip_type,
            payment_type: key.payment_type,
            pickup_week: key.pickup_week,
            total_trip_distance: self.trip_distance,
            avg_trip_distance: self.trip_distance / n,
            total_fare_amount: self.fare_amount,
            avg_fare_amount: self.fare_amount / n,
            total_total_amount: self.total_amount,
            total_extra: self.extra,
            avg_extra: self.extra / n,
            total_mta_tax: self.mta_tax,
            avg_tip_amount: self.tip_amount / n,
            avg_improvement_surcharge: self.improvement_surcharge / n,
            generous_customer_count: self.generous,
            lucky_flg: false,
        }
    }
}

type Groups = BTreeMap<GroupKey, GroupAccumulator>;

fn merge_groups(mut into: Groups, from: Groups) -> Groups {
    for (key, acc) in from {
        into.entry(key).or_default().merge(&acc);
    }
    into
}

/// Groups trips by (vendor, trip type, payment type, pickup week).
///
/// Rows come out sorted by key with `lucky_flg` unset.
pub fn group_trips(trips: &[FlaggedTrip], chunk_size: usize) -> Vec<WeeklyFact> {
    let groups = chunked_reduce(
        trips,
        chunk_size,
        |chunk| {
            let mut groups = Groups::new();
            for flagged in chunk {
                groups
                    .entry(GroupKey::of(&flagged.trip))
                    .or_default()
                    .push(flagged);
            }
            groups
        },
        merge_groups,
    )
    .unwrap_or_default();

    groups
        .iter()
        .map(|(key, acc)| acc.finish(*key))
        .collect()
}

/// Mean generous count across all groups, or `None` when there are none.
pub fn compute_mean_generous(facts: &[WeeklyFact]) -> Option<f64> {
    let counts: Vec<f64> = facts
        .iter()
        .map(|f| f.generous_customer_count as f64)
        .collect();
    mean(&counts)
}

/// Tags every group against an already computed mean generous count.
pub fn tag_lucky(facts: Vec<WeeklyFact>, mean_generous: f64) -> Vec<WeeklyFact> {
    facts
        .into_iter()
        .map(|mut fact| {
            fact.lucky_flg = fact.generous_customer_count as f64 > mean_generous;
            fact
        })
        .collect()
}

#[derive(Debug)]
pub struct AggregateOutput {
    pub facts: Vec<WeeklyFact>,
    pub mean_generous: f64,
}

impl AggregateOutput {
    pub fn lucky_groups(&self) -> usize {
        self.facts.iter().filter(|f| f.lucky_flg).count()
    }
}

/// Aggregates flagged trips into the weekly fact table.
///
/// Grouping completes over the whole input before the mean generous count
/// is taken, and that mean is fixed before any group is tagged.
#[tracing::instrument(skip_all, fields(flagged_rows = trips.len()))]
pub fn aggregate_trips(
    trips: &[FlaggedTrip],
    chunk_size: usize,
) -> Result<AggregateOutput, PipelineError> {
    let facts = group_trips(trips, chunk_size);
    let mean_generous = compute_mean_generous(&facts).ok_or(PipelineError::NoGroups)?;
    let facts = tag_lucky(facts, mean_generous);

    let output = AggregateOutput {
        facts,
        mean_generous,
    };
    info!(
        groups = output.facts.len(),
        mean_generous,
        lucky_groups = output.lucky_groups(),
        "Fact table created"
    );
    Ok(output)
}
