//! Horse racing capabilities: per-race trend statistics and
//! elimination-condition analysis over past results.

use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value, json};

use domchat_core::capability::{Capability, CapabilityRegistry, decode_arguments};
use domchat_core::partition::{Row, ScopedStore};
use domchat_types::capability::CapabilitySpec;
use domchat_types::error::CapabilityError;

use super::{execution_error, int_column, spec};

pub const HORSE_RACING: &str = "horse_racing";

pub(super) fn register(registry: &mut CapabilityRegistry) {
    registry
        .register(HORSE_RACING, RaceStatistics::new())
        .register(HORSE_RACING, EliminationConditions::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StatisticsCategory {
    Popularity,
    PostPosition,
    RunningStyle,
}

impl StatisticsCategory {
    fn as_str(self) -> &'static str {
        match self {
            Self::Popularity => "popularity",
            Self::PostPosition => "post_position",
            Self::RunningStyle => "running_style",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RaceStatisticsArgs {
    race_name: String,
    category: StatisticsCategory,
}

/// `get_race_statistics(race_name, category)`.
pub struct RaceStatistics {
    spec: CapabilitySpec,
}

impl RaceStatistics {
    pub const NAME: &'static str = "get_race_statistics";

    pub fn new() -> Self {
        Self {
            spec: spec(
                Self::NAME,
                "Fetch historical trend statistics for a race, broken down by favourite \
                 ranking, post position or running style.",
                json!({
                    "type": "object",
                    "properties": {
                        "race_name": {
                            "type": "string",
                            "description": "Race name, e.g. \"Shinzan Kinen\""
                        },
                        "category": {
                            "type": "string",
                            "enum": ["popularity", "post_position", "running_style"],
                            "description": "Breakdown to return"
                        }
                    },
                    "required": ["race_name", "category"]
                }),
            ),
        }
    }
}

impl Default for RaceStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Capability for RaceStatistics {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        let args: RaceStatisticsArgs = decode_arguments(Self::NAME, arguments)?;
        let started = Instant::now();

        let rows = store
            .fetch_all(
                "SELECT condition, total_runs, wins, seconds, places, \
                        COALESCE(win_rate, 0.0) AS win_rate, \
                        COALESCE(place_rate, 0.0) AS place_rate, \
                        COALESCE(show_rate, 0.0) AS show_rate \
                 FROM {race_statistics} \
                 WHERE race_name = ?1 AND category = ?2 \
                 ORDER BY sort_order, condition",
                &[json!(args.race_name), json!(args.category.as_str())],
            )
            .await?;

        tracing::info!(
            capability = Self::NAME,
            race = %args.race_name,
            category = args.category.as_str(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "race statistics fetched"
        );
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }
}

#[derive(Debug, Deserialize)]
struct EliminationArgs {
    race_name: String,
}

/// `analyze_elimination_conditions(race_name)`.
///
/// Groups past runners of the race by their previous-race favourite ranking
/// and by their previous finishing position.
pub struct EliminationConditions {
    spec: CapabilitySpec,
}

impl EliminationConditions {
    pub const NAME: &'static str = "analyze_elimination_conditions";

    pub fn new() -> Self {
        Self {
            spec: spec(
                Self::NAME,
                "Analyse how past runners of a race performed depending on their previous \
                 race (favourite ranking and finishing position), to rule out weak candidates.",
                json!({
                    "type": "object",
                    "properties": {
                        "race_name": {
                            "type": "string",
                            "description": "Race name"
                        }
                    },
                    "required": ["race_name"]
                }),
            ),
        }
    }

    async fn grouped(
        store: &mut dyn ScopedStore,
        race_name: &str,
        column: &str,
        label: impl Fn(i64) -> String,
    ) -> Result<Vec<Value>, CapabilityError> {
        let sql = format!(
            "SELECT rr.{column} AS bucket, \
                    COUNT(*) AS total, \
                    SUM(CASE WHEN rr.finish_position = 1 THEN 1 ELSE 0 END) AS wins, \
                    SUM(CASE WHEN rr.finish_position <= 3 THEN 1 ELSE 0 END) AS places \
             FROM {{race_results}} rr \
             JOIN {{races}} r ON rr.race_id = r.race_id \
             WHERE r.race_name = ?1 AND rr.{column} IS NOT NULL \
             GROUP BY rr.{column} \
             ORDER BY rr.{column}"
        );
        let rows = store.fetch_all(&sql, &[json!(race_name)]).await?;
        Ok(rows.iter().map(|row| condition_summary(row, &label)).collect())
    }
}

impl Default for EliminationConditions {
    fn default() -> Self {
        Self::new()
    }
}

fn condition_summary(row: &Row, label: impl Fn(i64) -> String) -> Value {
    let total = int_column(row, "total");
    let wins = int_column(row, "wins");
    let places = int_column(row, "places");
    json!({
        "condition": label(int_column(row, "bucket")),
        "total": total,
        "wins": wins,
        "win_rate": percentage(wins, total),
        "place_rate": percentage(places, total),
    })
}

/// `part / total` as a percentage rounded to one decimal; 0 for an empty group.
fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / total as f64).round() / 10.0
}

impl Capability for EliminationConditions {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        let args: EliminationArgs = decode_arguments(Self::NAME, arguments)?;
        if args.race_name.trim().is_empty() {
            return Err(execution_error(Self::NAME, "race_name must not be empty"));
        }
        let started = Instant::now();

        let previous_popularity = Self::grouped(store, &args.race_name, "previous_popularity", |n| {
            format!("previous popularity {n}")
        })
        .await?;
        let previous_finish = Self::grouped(store, &args.race_name, "previous_finish_position", |n| {
            format!("previous finish {n}")
        })
        .await?;

        tracing::info!(
            capability = Self::NAME,
            race = %args.race_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "elimination conditions analysed"
        );
        Ok(json!({
            "previous_popularity": previous_popularity,
            "previous_finish_position": previous_finish,
        }))
    }
}
