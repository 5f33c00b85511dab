//! Inbound telemetry events.
//!
//! A [`GameEvent`] is parsed from one text frame. Only the envelope fields
//! (`type`, `timestamp`, `channel`, `data`) are interpreted; the original JSON
//! object is kept verbatim so it can be rebroadcast untouched.
//!
//! [`EventKind`] is a typed view over the tags the game client is known to
//! emit. It exists for log output only: aggregation and broadcast treat every
//! tag the same, including ones that map to [`EventKind::Unknown`].
//!
//! Payload fields are lenient. A missing or oddly-typed field renders as an
//! empty string instead of rejecting the event.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::errors::FrameError;

/// A parsed inbound event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    event_type: String,
    timestamp: Option<f64>,
    channel: Option<String>,
    data: Value,
    raw: Value,
}

impl GameEvent {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: Value = serde_json::from_str(text)?;
        Self::from_value(raw)
    }

    /// Parse a binary frame that is expected to carry UTF-8 JSON.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)?;
        Self::parse(text)
    }

    /// Build from an already-decoded JSON value.
    pub fn from_value(raw: Value) -> Result<Self, FrameError> {
        let obj = match &raw {
            Value::Object(obj) => obj,
            other => return Err(FrameError::NotAnObject(json_kind(other))),
        };
        let event_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_owned();
        let timestamp = obj.get("timestamp").and_then(Value::as_f64);
        let channel = obj
            .get("channel")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_owned);
        let data = obj.get("data").cloned().unwrap_or(Value::Null);
        Ok(Self {
            event_type,
            timestamp,
            channel,
            data,
            raw,
        })
    }

    /// The `type` tag.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Producer-supplied timestamp in seconds since the epoch.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Producer timestamp as a UTC instant (millisecond precision).
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp?;
        let millis = (secs * 1000.0).trunc();
        if !millis.is_finite() {
            return None;
        }
        DateTime::from_timestamp_millis(millis as i64)
    }

    /// Channel (game session) this event belongs to. Empty strings count as absent.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// The `data` payload, `Value::Null` when absent.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The inbound object exactly as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Typed view of the payload for known tags.
    pub fn kind(&self) -> EventKind {
        EventKind::from_parts(&self.event_type, &self.data)
    }

    /// One-line human description used in the event log.
    pub fn summary(&self) -> String {
        self.kind().describe(self.channel())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Lenient payload fields ──────────────────────────────────────────────────

/// A scalar payload field kept only for display.
///
/// Strings, numbers and booleans are rendered as text; anything else
/// (objects, arrays, null) is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field(Option<String>);

impl Field {
    /// The rendered value, if present.
    pub fn get(&self) -> Option<&str> {
        self.0.as_deref().filter(|s| !s.is_empty())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self(match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or(""))
    }
}

/// A numeric payload field displayed rounded to the nearest integer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rounded(Option<f64>);

impl<'de> Deserialize<'de> for Rounded {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self(value.as_f64()))
    }
}

impl fmt::Display for Rounded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) if v.is_finite() => write!(f, "{}", v.round() as i64),
            _ => Ok(()),
        }
    }
}

/// Nested payload value that falls back to `T::default()` when malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lenient<T>(pub T);

impl<'de, T: DeserializeOwned + Default> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self(serde_json::from_value(value).unwrap_or_default()))
    }
}

fn payload<T: DeserializeOwned + Default>(data: &Value) -> T {
    serde_json::from_value(data.clone()).unwrap_or_default()
}

// ── Known payloads ──────────────────────────────────────────────────────────

/// `monster_join` / `rarity_assigned` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonsterJoin {
    /// Viewer who owns the monster.
    pub username: Field,
    /// Monster species.
    pub monster_type: Field,
}

/// `entity_spawned` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EntitySpawned {
    /// Spawned entity id.
    pub enemy_id: Field,
    /// Viewer who owns the monster.
    pub username: Field,
    /// Monster species.
    pub monster_type: Field,
}

/// `monster_death` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonsterDeath {
    /// Viewer who owns the monster.
    pub username: Field,
    /// Monster species.
    pub monster_type: Field,
    /// Who landed the killing blow.
    pub killer: Field,
    /// How it died.
    pub cause: Field,
}

/// `monster_power_changed` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PowerChanged {
    /// Current power level.
    pub current_power: Field,
    /// Power needed for the next tier.
    pub threshold: Field,
}

/// `mxp_granted` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MxpGranted {
    /// Amount gained or spent.
    pub amount: Field,
    /// Running total after the grant.
    pub total: Field,
}

/// `mxp_spent` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MxpSpent {
    /// Viewer who owns the monster.
    pub username: Field,
    /// Amount gained or spent.
    pub amount: Field,
    /// What the MXP bought.
    pub upgrade_type: Field,
    /// MXP left afterwards.
    pub remaining: Field,
}

/// One candidate in a boss vote.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoteOption {
    /// Internal name.
    pub name: Field,
}

/// `vote_started` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoteStarted {
    /// Candidates on the ballot.
    pub options: Lenient<Vec<VoteOption>>,
    /// Voting window in seconds.
    pub duration: Field,
}

/// `vote_updated` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoteUpdated {
    /// Vote count per candidate.
    pub votes: Lenient<BTreeMap<String, Field>>,
}

/// Winning candidate of a boss vote.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoteWinner {
    /// Name shown to players.
    pub display_name: Field,
    /// Internal name.
    pub name: Field,
}

/// `vote_result` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoteResult {
    /// The winning candidate.
    pub winner: Lenient<VoteWinner>,
}

/// `boss_spawned` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BossSpawned {
    /// Boss display name.
    pub boss_name: Field,
}

/// `boss_killed` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BossKilled {
    /// Boss display name.
    pub boss_name: Field,
    /// Who landed the killing blow.
    pub killer: Field,
}

/// `player_level_up` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LevelUp {
    /// New level.
    pub level: Field,
}

/// `player_experience_gained` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExperienceGained {
    /// Amount gained or spent.
    pub amount: Field,
    /// Experience after the gain.
    pub total_xp: Field,
}

/// `player_health_changed` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthChanged {
    /// Health after the change.
    pub current_health: Rounded,
    /// Health cap.
    pub max_health: Rounded,
    /// Health as a percentage of the cap.
    pub health_percentage: Rounded,
}

/// `player_death` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerDeath {
    /// Who landed the killing blow.
    pub killer: Field,
    /// How it died.
    pub cause: Field,
}

/// `evolution` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Evolution {
    /// Viewer who owns the monster.
    pub username: Field,
    /// Form before evolving.
    pub old_form: Field,
    /// Form after evolving.
    pub new_form: Field,
    /// Rarity tier.
    pub rarity_type: Field,
}

/// `rarity_assigned` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RarityAssigned {
    /// Viewer who owns the monster.
    pub username: Field,
    /// Rarity tier.
    pub rarity_type: Field,
}

/// Typed view of an event for the tags the game client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A game session began.
    SessionStart,
    /// A game session ended.
    SessionEnd,
    /// A viewer joined as a monster.
    MonsterJoin(MonsterJoin),
    /// A monster entity entered the world.
    EntitySpawned(EntitySpawned),
    /// A monster died.
    MonsterDeath(MonsterDeath),
    /// Monster power moved.
    MonsterPowerChanged(PowerChanged),
    /// Monster experience was granted.
    MxpGranted(MxpGranted),
    /// Monster experience was spent on an upgrade.
    MxpSpent(MxpSpent),
    /// A boss vote opened.
    VoteStarted(VoteStarted),
    /// Boss vote tallies changed.
    VoteUpdated(VoteUpdated),
    /// A boss vote closed.
    VoteResult(VoteResult),
    /// A boss appeared.
    BossSpawned(BossSpawned),
    /// A boss was defeated.
    BossKilled(BossKilled),
    /// The player levelled up.
    PlayerLevelUp(LevelUp),
    /// The player gained experience.
    PlayerExperienceGained(ExperienceGained),
    /// Player health changed.
    PlayerHealthChanged(HealthChanged),
    /// The player died.
    PlayerDeath(PlayerDeath),
    /// A monster evolved.
    Evolution(Evolution),
    /// A monster was assigned a rarity.
    RarityAssigned(RarityAssigned),
    /// Game paused.
    GamePaused,
    /// Game resumed.
    GameResumed,
    /// Game restarted.
    GameRestart,
    /// Any other tag; the raw payload is kept for the log line.
    Unknown {
        /// The unrecognised `type` value.
        tag: String,
        /// The event's `data` object.
        data: Value,
    },
}

impl EventKind {
    /// Classify a tag and decode its payload.
    pub fn from_parts(tag: &str, data: &Value) -> Self {
        match tag {
            "session_start" => Self::SessionStart,
            "session_end" => Self::SessionEnd,
            "monster_join" => Self::MonsterJoin(payload(data)),
            "entity_spawned" => Self::EntitySpawned(payload(data)),
            "monster_death" => Self::MonsterDeath(payload(data)),
            "monster_power_changed" => Self::MonsterPowerChanged(payload(data)),
            "mxp_granted" => Self::MxpGranted(payload(data)),
            "mxp_spent" => Self::MxpSpent(payload(data)),
            "vote_started" => Self::VoteStarted(payload(data)),
            "vote_updated" => Self::VoteUpdated(payload(data)),
            "vote_result" => Self::VoteResult(payload(data)),
            "boss_spawned" => Self::BossSpawned(payload(data)),
            "boss_killed" => Self::BossKilled(payload(data)),
            "player_level_up" => Self::PlayerLevelUp(payload(data)),
            "player_experience_gained" => Self::PlayerExperienceGained(payload(data)),
            "player_health_changed" => Self::PlayerHealthChanged(payload(data)),
            "player_death" => Self::PlayerDeath(payload(data)),
            "evolution" => Self::Evolution(payload(data)),
            "rarity_assigned" => Self::RarityAssigned(payload(data)),
            "game_paused" => Self::GamePaused,
            "game_resumed" => Self::GameResumed,
            "game_restart" => Self::GameRestart,
            other => Self::Unknown {
                tag: other.to_owned(),
                data: data.clone(),
            },
        }
    }

    /// Whether the tag is one of the known game events.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }

    /// Render the log line for this event.
    pub fn describe(&self, channel: Option<&str>) -> String {
        let channel = channel.unwrap_or("unknown");
        match self {
            Self::SessionStart => format!("SESSION START - Channel: {channel}"),
            Self::SessionEnd => format!("SESSION END - Channel: {channel}"),
            Self::MonsterJoin(d) => {
                format!("MONSTER JOIN - {} as {}", d.username, d.monster_type)
            }
            Self::EntitySpawned(d) => format!(
                "ENTITY SPAWNED - ID:{} {} ({})",
                d.enemy_id, d.username, d.monster_type
            ),
            Self::MonsterDeath(d) => format!(
                "MONSTER DEATH - {}'s {} killed by {} ({})",
                d.username, d.monster_type, d.killer, d.cause
            ),
            Self::MonsterPowerChanged(d) => {
                format!("MONSTER POWER - {}/{}", d.current_power, d.threshold)
            }
            Self::MxpGranted(d) => format!("MXP GRANTED - +{} (Total: {})", d.amount, d.total),
            Self::MxpSpent(d) => format!(
                "MXP SPENT - {} spent {} on {} ({} remaining)",
                d.username, d.amount, d.upgrade_type, d.remaining
            ),
            Self::VoteStarted(d) => {
                let names: Vec<String> = d.options.0.iter().map(|o| o.name.to_string()).collect();
                format!(
                    "BOSS VOTE STARTED - Options: {} ({}s)",
                    names.join(", "),
                    d.duration
                )
            }
            Self::VoteUpdated(d) => {
                let tally: Vec<String> = d
                    .votes
                    .0
                    .iter()
                    .map(|(boss, votes)| format!("{boss}:{votes}"))
                    .collect();
                format!("VOTE UPDATE - {}", tally.join(", "))
            }
            Self::VoteResult(d) => {
                let winner = &d.winner.0;
                let name = winner
                    .display_name
                    .get()
                    .or_else(|| winner.name.get())
                    .unwrap_or("");
                format!("VOTE RESULT - Winner: {name}")
            }
            Self::BossSpawned(d) => format!("BOSS SPAWNED - {}", d.boss_name),
            Self::BossKilled(d) => {
                format!("BOSS KILLED - {} defeated by {}", d.boss_name, d.killer)
            }
            Self::PlayerLevelUp(d) => format!("PLAYER LEVEL UP - Level {}", d.level),
            Self::PlayerExperienceGained(d) => {
                format!("PLAYER XP - +{} (Total: {})", d.amount, d.total_xp)
            }
            Self::PlayerHealthChanged(d) => format!(
                "PLAYER HEALTH - {}/{} ({}%)",
                d.current_health, d.max_health, d.health_percentage
            ),
            Self::PlayerDeath(d) => format!("PLAYER DEATH - Killed by {} ({})", d.killer, d.cause),
            Self::Evolution(d) => {
                let rarity = d
                    .rarity_type
                    .get()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default();
                format!(
                    "EVOLUTION - {}: {} → {}{rarity}",
                    d.username, d.old_form, d.new_form
                )
            }
            Self::RarityAssigned(d) => {
                format!("RARITY ASSIGNED - {} → {}", d.username, d.rarity_type)
            }
            Self::GamePaused => "GAME PAUSED".to_owned(),
            Self::GameResumed => "GAME RESUMED".to_owned(),
            Self::GameRestart => "GAME RESTART REQUESTED".to_owned(),
            Self::Unknown { tag, data } => {
                let pretty = serde_json::to_string_pretty(data).unwrap_or_default();
                format!("UNKNOWN EVENT - {tag}: {pretty}")
            }
        }
    }
}
