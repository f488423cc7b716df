use polars::prelude::*;

use verte_lake::gold::{aggregate_energy, aggregate_market, build_gold_frame, join_market_energy};
use verte_lake::PipelineError;

fn market_frame() -> DataFrame {
    df!(
        "code_departement" => ["92", "92", "92"],
        "trimestre" => ["2020Q1", "2020Q1", "2020Q1"],
        "prix_m2" => [1000.0, 2000.0, 3000.0],
    )
    .unwrap()
}

fn energy_frame() -> DataFrame {
    df!(
        "tv016_departement_code" => ["92", "92", "92"],
        "trimestre" => ["2020Q1", "2020Q1", "2020Q1"],
        "classe_consommation_energie" => ["A", "A", "G"],
    )
    .unwrap()
}

#[test]
fn market_aggregation_counts_and_averages() {
    let agg = aggregate_market(market_frame()).unwrap();
    assert_eq!(agg.height(), 1);

    let nb = agg.column("nb_ventes").unwrap().i64().unwrap();
    assert_eq!(nb.get(0), Some(3));
    let median = agg.column("prix_m2_median").unwrap().f64().unwrap();
    assert_eq!(median.get(0), Some(2000.0));
    let mean = agg.column("prix_m2_mean").unwrap().f64().unwrap();
    assert_eq!(mean.get(0), Some(2000.0));
}

#[test]
fn energy_aggregation_pivots_all_seven_classes() {
    let agg = aggregate_energy(energy_frame()).unwrap();
    assert_eq!(agg.height(), 1);

    let class_a = agg.column("classe_A").unwrap().i64().unwrap();
    assert_eq!(class_a.get(0), Some(2));
    let class_g = agg.column("classe_G").unwrap().i64().unwrap();
    assert_eq!(class_g.get(0), Some(1));
    let total = agg.column("dpe_total").unwrap().i64().unwrap();
    assert_eq!(total.get(0), Some(3));

    let pct_a = agg.column("classe_A_pct").unwrap().f64().unwrap();
    assert_eq!(pct_a.get(0), Some(66.7));
    let pct_g = agg.column("classe_G_pct").unwrap().f64().unwrap();
    assert_eq!(pct_g.get(0), Some(33.3));

    // classes with no observations are still materialized, as zero
    for class in ["B", "C", "D", "E", "F"] {
        let counts = agg
            .column(&format!("classe_{class}"))
            .unwrap()
            .i64()
            .unwrap();
        assert_eq!(counts.get(0), Some(0));
    }
}

#[test]
fn energy_percentages_sum_to_100() {
    let dpe = df!(
        "tv016_departement_code" => ["59", "59", "59", "59", "59", "59", "59"],
        "trimestre" => ["2021Q2"; 7],
        "classe_consommation_energie" => ["A", "B", "C", "D", "E", "F", "G"],
    )
    .unwrap();
    let agg = aggregate_energy(dpe).unwrap();
    let mut sum = 0.0;
    for class in ["A", "B", "C", "D", "E", "F", "G"] {
        sum += agg
            .column(&format!("classe_{class}_pct"))
            .unwrap()
            .f64()
            .unwrap()
            .get(0)
            .unwrap();
    }
    assert!((sum - 100.0).abs() <= 0.1);
}

#[test]
fn quarters_without_diagnostics_keep_null_metrics() {
    // DVF has two quarters; DPE covers only the first
    let dvf = df!(
        "code_departement" => ["92", "92"],
        "trimestre" => ["2020Q1", "2020Q2"],
        "prix_m2" => [5000.0, 5100.0],
    )
    .unwrap();
    let market = aggregate_market(dvf).unwrap();
    let energy = aggregate_energy(energy_frame()).unwrap();
    let joined = join_market_energy(market, energy).unwrap();
    assert_eq!(joined.height(), 2);

    let totals = joined.column("dpe_total").unwrap().i64().unwrap();
    assert_eq!(totals.get(0), Some(3));
    // no fabricated zeros for 2020Q2
    assert_eq!(totals.get(1), None);
}

#[test]
fn unknown_classes_are_excluded_from_the_distribution() {
    let dpe = df!(
        "tv016_departement_code" => ["92", "92", "92"],
        "trimestre" => ["2020Q1", "2020Q1", "2020Q1"],
        "classe_consommation_energie" => ["A", "N", "H"],
    )
    .unwrap();
    let agg = aggregate_energy(dpe).unwrap();
    let total = agg.column("dpe_total").unwrap().i64().unwrap();
    assert_eq!(total.get(0), Some(1));
}

#[test]
fn missing_columns_fail_fast_with_names() {
    let dpe = df!(
        "tv016_departement_code" => ["92"],
        "trimestre" => ["2020Q1"],
    )
    .unwrap();
    match aggregate_energy(dpe) {
        Err(PipelineError::MissingColumns { context, columns }) => {
            assert_eq!(context, "silver DPE");
            assert_eq!(columns, vec!["classe_consommation_energie".to_string()]);
        }
        other => panic!("expected MissingColumns, got {other:?}"),
    }
}

#[test]
fn gold_frame_is_ordered_and_complete() {
    let gold = build_gold_frame(market_frame(), energy_frame()).unwrap();
    let names = gold.get_column_names();
    assert_eq!(
        &names[..7],
        &[
            "departement",
            "annee",
            "trimestre",
            "nb_ventes",
            "prix_m2_median",
            "prix_m2_mean",
            "dpe_total"
        ]
    );
    assert_eq!(names.len(), 7 + 7 + 7);

    let annee = gold.column("annee").unwrap().i32().unwrap();
    assert_eq!(annee.get(0), Some(2020));
}
