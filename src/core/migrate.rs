//! Versioned plan schema. Persisted plans carry a `schemaVersion`; older shapes
//! are lifted one version at a time until they deserialize as [`Plan`].

use serde_json::{Map, Value, json};

use super::error::PlanError;
use super::moves::find_spec_by_id;
use super::types::{DEFAULT_TERMINAL_AGE, Plan};

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

type Step = fn(Value) -> Result<Value, PlanError>;

/// `STEPS[n]` lifts version `n + 1` to `n + 2`.
const STEPS: [Step; 2] = [v1_to_v2, v2_to_v3];

/// Parses plan JSON of any supported version.
pub fn load_plan(json: &str) -> Result<Plan, PlanError> {
    let value: Value = serde_json::from_str(json)?;
    migrate_plan(value)
}

pub fn migrate_plan(value: Value) -> Result<Plan, PlanError> {
    let mut version = schema_version(&value)?;
    let mut value = value;
    while version < CURRENT_SCHEMA_VERSION {
        tracing::debug!(from = version, to = version + 1, "migrating plan schema");
        value = STEPS[(version - 1) as usize](value)?;
        version += 1;
    }
    Ok(serde_json::from_value(value)?)
}

/// Explicit `schemaVersion` (or the legacy `version`), else inferred from shape:
/// flat documents are v1, nested ones v2.
pub fn schema_version(value: &Value) -> Result<u32, PlanError> {
    let obj = as_object(value)?;
    let tagged = obj.get("schemaVersion").or_else(|| obj.get("version"));
    match tagged {
        Some(v) => {
            let found = v.as_u64().ok_or_else(|| {
                PlanError::Malformed("schemaVersion must be a positive integer".into())
            })?;
            if found == 0 {
                return Err(PlanError::Malformed("schemaVersion must be a positive integer".into()));
            }
            if found > u64::from(CURRENT_SCHEMA_VERSION) {
                return Err(PlanError::UnsupportedVersion {
                    found,
                    supported: CURRENT_SCHEMA_VERSION,
                });
            }
            Ok(found as u32)
        }
        None if obj.contains_key("personal") => Ok(2),
        None => Ok(1),
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, PlanError> {
    value
        .as_object()
        .ok_or_else(|| PlanError::Malformed("plan must be a JSON object".into()))
}

fn into_object(value: Value) -> Result<Map<String, Value>, PlanError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(PlanError::Malformed("plan must be a JSON object".into())),
    }
}

fn required(obj: &Map<String, Value>, version: u32, field: &str) -> Result<Value, PlanError> {
    obj.get(field)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| PlanError::MissingField {
            version,
            field: field.to_string(),
        })
}

fn number_or(obj: &Map<String, Value>, field: &str, default: f64) -> Result<Value, PlanError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(json!(default)),
        Some(v) if v.is_number() => Ok(v.clone()),
        Some(_) => Err(PlanError::Malformed(format!("{field} must be a number"))),
    }
}

fn copy_if_present(from: &Map<String, Value>, to: &mut Map<String, Value>, src: &str, dst: &str) {
    if let Some(v) = from.get(src).filter(|v| !v.is_null()) {
        to.insert(dst.to_string(), v.clone());
    }
}

fn legacy_account_kind(kind: &str) -> Option<&'static str> {
    let kind = match kind.to_ascii_lowercase().as_str() {
        "401k" | "403b" | "457" | "ira" | "traditional" | "traditional-ira" | "sep-ira" => {
            "tax-deferred"
        }
        "roth" | "roth-ira" => "tax-free",
        "roth-401k" | "roth401k" => "roth-401k",
        "brokerage" | "taxable" | "investment" => "taxable",
        "savings" | "checking" | "cash" | "hysa" => "cash",
        "hsa" => "hsa",
        "529" | "education" => "education",
        "pension" | "foreign-pension" => "foreign-pension",
        _ => return None,
    };
    Some(kind)
}

/// Flat v1 documents: `age`, `retireAge`, `salary`, `raise`, a single
/// `expenses` number and accounts tagged with a free-form `type`.
fn v1_to_v2(value: Value) -> Result<Value, PlanError> {
    let obj = into_object(value)?;
    let age = required(&obj, 1, "age")?;
    let retire_age = required(&obj, 1, "retireAge")?;

    let mut personal = Map::new();
    personal.insert("currentAge".into(), age.clone());
    personal.insert("retirementAge".into(), retire_age);
    copy_if_present(&obj, &mut personal, "filingStatus", "filingStatus");
    copy_if_present(&obj, &mut personal, "state", "state");
    copy_if_present(&obj, &mut personal, "dependents", "dependents");

    let mut income = Map::new();
    income.insert("wages".into(), number_or(&obj, "salary", 0.0)?);
    income.insert("raiseRate".into(), number_or(&obj, "raise", 0.03)?);

    let legacy_accounts = match obj.get("accounts") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(PlanError::Malformed("accounts must be an array".into())),
    };
    let mut accounts = Vec::with_capacity(legacy_accounts.len());
    for (i, item) in legacy_accounts.into_iter().enumerate() {
        let account = into_object(item)?;
        let legacy_type = account
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PlanError::MissingField {
                version: 1,
                field: "accounts[].type".into(),
            })?;
        let kind = legacy_account_kind(legacy_type)
            .ok_or_else(|| PlanError::Malformed(format!("unknown account type: {legacy_type}")))?;
        let id = account
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("account-{}", i + 1));
        let mut next = Map::new();
        next.insert("id".into(), json!(id));
        copy_if_present(&account, &mut next, "name", "name");
        next.insert("kind".into(), json!(kind));
        next.insert("balance".into(), number_or(&account, "balance", 0.0)?);
        next.insert(
            "annualContribution".into(),
            number_or(&account, "contribution", 0.0)?,
        );
        copy_if_present(&account, &mut next, "return", "expectedReturn");
        accounts.push(Value::Object(next));
    }

    let mut expenses = Map::new();
    expenses.insert("living".into(), number_or(&obj, "expenses", 0.0)?);
    copy_if_present(&obj, &mut expenses, "inflation", "generalInflation");

    let mut social_security = Map::new();
    copy_if_present(&obj, &mut social_security, "socialSecurity", "benefitAtFullRetirementAge");
    copy_if_present(&obj, &mut social_security, "claimAge", "claimAge");

    let start_age = age;
    let moves: Vec<Value> = match obj.get("enabledMoves") {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(Value::as_str)
            .map(|id| json!({ "id": id, "enabled": true, "startAge": start_age }))
            .collect(),
        _ => Vec::new(),
    };

    Ok(json!({
        "schemaVersion": 2,
        "personal": personal,
        "income": income,
        "accounts": accounts,
        "expenses": expenses,
        "socialSecurity": social_security,
        "moves": moves,
    }))
}

/// v3 adds the horizon, sensitivity deltas, medical inflation and the full
/// catalog metadata on each stored move.
fn v2_to_v3(value: Value) -> Result<Value, PlanError> {
    let mut obj = into_object(value)?;

    let personal = obj
        .get_mut("personal")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| PlanError::MissingField {
            version: 2,
            field: "personal".into(),
        })?;
    let current_age = personal
        .get("currentAge")
        .and_then(Value::as_u64)
        .ok_or_else(|| PlanError::MissingField {
            version: 2,
            field: "personal.currentAge".into(),
        })?;
    personal
        .entry("terminalAge")
        .or_insert_with(|| json!(DEFAULT_TERMINAL_AGE));

    obj.entry("sensitivity")
        .or_insert_with(|| json!({ "bearReturnDelta": -0.02, "bullReturnDelta": 0.02 }));
    if let Some(expenses) = obj.get_mut("expenses").and_then(Value::as_object_mut) {
        expenses
            .entry("medicalInflation")
            .or_insert_with(|| json!(0.05));
    }
    if let Some(ss) = obj.get_mut("socialSecurity").and_then(Value::as_object_mut) {
        ss.entry("fullRetirementAge").or_insert_with(|| json!(67));
    }

    let moves = match obj.remove("moves") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(PlanError::Malformed("moves must be an array".into())),
    };
    let mut upgraded = Vec::with_capacity(moves.len());
    for item in moves {
        let mut mv = into_object(item)?;
        let id = mv
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PlanError::MissingField {
                version: 2,
                field: "moves[].id".into(),
            })?
            .to_string();
        let spec = find_spec_by_id(&id).ok_or(PlanError::UnknownMove(id))?;
        let template = serde_json::to_value(spec.instantiate(current_age as u32, None))?;
        if let Value::Object(defaults) = template {
            for (key, default) in defaults {
                if key != "enabled" {
                    mv.entry(key).or_insert(default);
                }
            }
        }
        upgraded.push(Value::Object(mv));
    }
    obj.insert("moves".into(), Value::Array(upgraded));
    obj.insert("schemaVersion".into(), json!(3));
    Ok(Value::Object(obj))
}
