mod scenario;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use debias_analysis::{BiasAnalyzer, BiasReportRequest};
use debias_config::{LoggingConfig, load_workspace_config};
use debias_core::Dataset;
use debias_model::{
    DebiasSession, GroupConfusion, PredictOptions, SamplerOptions, group_confusion_metrics,
    mean_prediction_gap,
};
use tracing_subscriber::EnvFilter;

use crate::scenario::{PROTECTED, TARGET, TREATMENT, cancer_data, cancer_graph};

const ROWS: usize = 2000;
const THRESHOLD: f64 = 0.5;

fn main() -> Result<()> {
    let config = load_workspace_config(".").context("failed to load .debias/config.toml")?;
    init_tracing(&config.logging);

    let graph = cancer_graph().context("failed to build cancer graph")?;
    let data = cancer_data(ROWS, config.sampler.seed).context("failed to generate data")?;
    tracing::info!(rows = data.len(), seed = config.sampler.seed, "generated screening data");

    let report = BiasAnalyzer::new(&graph)
        .report(
            BiasReportRequest {
                target: TARGET.to_owned(),
                treatment: Some(TREATMENT.to_owned()),
                protected_attributes: PROTECTED.iter().map(|p| (*p).to_owned()).collect(),
            },
            Some(&data),
        )
        .context("bias report failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let options = SamplerOptions::from(&config.sampler);
    let mut session = DebiasSession::new(graph, data.clone());

    // Screening model: performance of thresholded predictions against the
    // true cancer status, per ethnicity.
    let model = session
        .build_model(TARGET, &["ethnicity"])
        .context("failed to build screening model")?;
    for note in model.notes() {
        println!("note: {note}");
    }
    let has_offsets = model.hierarchical_effects().count() > 0;
    let fit = session.fit(&options).context("screening fit failed")?;
    for warning in &fit.warnings {
        println!("warning: {warning}");
    }
    for stats in fit.posterior.chain_stats() {
        tracing::info!(
            chain = stats.chain,
            step_size = stats.step_size,
            accept = stats.mean_accept_prob,
            divergences = stats.divergences,
            "screening chain finished"
        );
    }

    let cancer = data.numeric_column(TREATMENT)?;
    let ethnicity = data.labels("ethnicity")?;
    if !has_offsets {
        println!("note: no protected group offsets in the screening model");
    }
    let configured = PredictOptions::from(&config.prediction);
    for (label, predict_options) in screening_runs(has_offsets, configured) {
        let predictions = session
            .predict_with(&data, TARGET, &predict_options)
            .with_context(|| format!("{label} prediction failed"))?;
        let metrics = group_confusion_metrics(&cancer, &predictions, &ethnicity, THRESHOLD)?;
        println!("{label} model performance by ethnicity:");
        print_metrics(&metrics);
    }

    // Risk model: cancer from its risk factors, where smoking carries an
    // ethnicity offset that correction removes.
    session
        .build_model(TREATMENT, &["ethnicity"])
        .context("failed to build risk model")?;
    session.fit(&options).context("risk fit failed")?;
    report_gap(&session, &data, &ethnicity)?;

    if !config.prediction.bias_correction {
        println!("bias correction is disabled in config; screening predictions are uncorrected");
    }
    Ok(())
}

/// Standard and fair runs only differ when there are offsets to drop.
fn screening_runs(
    has_offsets: bool,
    configured: PredictOptions,
) -> Vec<(&'static str, PredictOptions)> {
    if has_offsets {
        vec![("standard", PredictOptions::uncorrected()), ("fair", configured)]
    } else {
        vec![("screening", configured)]
    }
}

fn report_gap(session: &DebiasSession, data: &Dataset, groups: &[String]) -> Result<()> {
    for (label, options) in [
        ("standard", PredictOptions::uncorrected()),
        ("fair", PredictOptions::default()),
    ] {
        let predictions = session.predict_with(data, TREATMENT, &options)?;
        match mean_prediction_gap(&predictions, groups)? {
            Some(gap) => println!("{label} cancer risk gap across ethnicity: {gap:.4}"),
            None => println!("{label} cancer risk gap across ethnicity: n/a"),
        }
    }
    Ok(())
}

fn print_metrics(metrics: &BTreeMap<String, GroupConfusion>) {
    let fmt = |value: Option<f64>| value.map_or_else(|| "n/a".to_owned(), |v| format!("{v:.3}"));
    for (group, confusion) in metrics {
        println!(
            "  ethnicity={group} n={} sensitivity={} specificity={} ppv={}",
            confusion.count,
            fmt(confusion.sensitivity),
            fmt(confusion.specificity),
            fmt(confusion.ppv)
        );
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
