//! Decote verte: the price discount of poorly-rated housing (F/G) against
//! the D reference class, on transactions matched to diagnostics.

use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;

use crate::analytics::{round2, AnalysisOutcome};
use crate::error::Result;
use crate::transform::require_columns;

/// Classes compared by the decote analysis: D is the reference.
const TARGET_CLASSES: [&str; 3] = ["D", "F", "G"];

#[derive(Debug, Serialize)]
pub struct DecoteVerte {
    /// Mean price per m² per energy class.
    pub prix_m2_moyen: BTreeMap<String, f64>,
    pub nb_transactions: BTreeMap<String, i64>,
    /// Discount in percent versus class D, keys like `F_vs_D`.
    pub decote_pct: BTreeMap<String, f64>,
}

/// Inner join of transactions to diagnostics on commune code.
///
/// This is deliberately NOT the Gold join: Gold left-joins aggregates on
/// (departement, trimestre); the decote needs transaction-level class labels
/// and only keeps communes present on both sides.
pub fn join_transactions_on_commune(dvf: &DataFrame, dpe: &DataFrame) -> Result<DataFrame> {
    require_columns(dvf, &["code_commune", "prix_m2"], "silver DVF")?;
    require_columns(
        dpe,
        &["code_insee_commune_actualise", "classe_consommation_energie"],
        "silver DPE",
    )?;
    let joined = dvf
        .clone()
        .lazy()
        .select([col("code_commune"), col("prix_m2")])
        .join(
            dpe.clone()
                .lazy()
                .select([
                    col("code_insee_commune_actualise"),
                    col("classe_consommation_energie"),
                ]),
            [col("code_commune")],
            [col("code_insee_commune_actualise")],
            JoinArgs::new(JoinType::Inner),
        )
        .collect()?;
    Ok(joined)
}

fn compute(dvf: &DataFrame, dpe: &DataFrame) -> Result<AnalysisOutcome<DecoteVerte>> {
    let joined = join_transactions_on_commune(dvf, dpe)?;
    let targets = Series::new("classes", TARGET_CLASSES.to_vec());
    let per_class = joined
        .lazy()
        .filter(col("classe_consommation_energie").is_in(lit(targets)))
        .group_by([col("classe_consommation_energie")])
        .agg([
            col("prix_m2").mean().alias("prix_m2_moyen"),
            col("prix_m2").count().cast(DataType::Int64).alias("nb_transactions"),
        ])
        .collect()?;

    let mut prix_m2_moyen = BTreeMap::new();
    let mut nb_transactions = BTreeMap::new();
    let classes = per_class
        .column("classe_consommation_energie")?
        .str()?
        .clone();
    let means = per_class.column("prix_m2_moyen")?.f64()?.clone();
    let counts = per_class.column("nb_transactions")?.i64()?.clone();
    for i in 0..per_class.height() {
        if let (Some(class), Some(m), Some(n)) = (classes.get(i), means.get(i), counts.get(i)) {
            prix_m2_moyen.insert(class.to_string(), round2(m));
            nb_transactions.insert(class.to_string(), n);
        }
    }

    if prix_m2_moyen.is_empty() {
        return Ok(AnalysisOutcome::Failed {
            reason: "no transactions in classes D, F or G after the commune join".to_string(),
        });
    }

    let mut warnings = Vec::new();
    let mut decote_pct = BTreeMap::new();
    match prix_m2_moyen.get("D").copied() {
        Some(prix_d) => {
            for class in ["F", "G"] {
                match prix_m2_moyen.get(class) {
                    Some(prix) => {
                        decote_pct
                            .insert(format!("{class}_vs_D"), round2((prix_d - prix) / prix_d * 100.0));
                    }
                    None => warnings.push(format!("class {class} absent from the joined data")),
                }
            }
        }
        None => warnings.push("reference class D absent, no discount computed".to_string()),
    }

    Ok(AnalysisOutcome::from_parts(
        DecoteVerte {
            prix_m2_moyen,
            nb_transactions,
            decote_pct,
        },
        warnings,
    ))
}

pub fn decote_verte(dvf: &DataFrame, dpe: &DataFrame) -> AnalysisOutcome<DecoteVerte> {
    match compute(dvf, dpe) {
        Ok(outcome) => outcome,
        Err(e) => AnalysisOutcome::Failed {
            reason: e.to_string(),
        },
    }
}
