use anyhow::Result;
use debias_core::{Attributes, ColumnKind, ColumnSpec, Dataset, Schema, protected_attrs};
use debias_graph_algo::CausalGraph;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

pub const TARGET: &str = "test_positive";
pub const TREATMENT: &str = "cancer";
pub const PROTECTED: [&str; 3] = ["ethnicity", "gender", "age"];

pub fn cancer_graph() -> Result<CausalGraph> {
    let mut graph = CausalGraph::new();
    for node in PROTECTED {
        graph.add_node(node, protected_attrs())?;
    }
    for (source, target) in [
        ("ethnicity", "smoking"),
        ("age", "family_history"),
        ("smoking", "cancer"),
        ("family_history", "cancer"),
        ("cancer", TARGET),
        ("ethnicity", TARGET),
    ] {
        graph.add_edge(source, target, Attributes::new())?;
    }
    Ok(graph)
}

pub fn cancer_data(rows: usize, seed: u64) -> Result<Dataset> {
    let schema = Schema::new(vec![
        ColumnSpec::new("age", ColumnKind::Numeric),
        ColumnSpec::new("gender", ColumnKind::Binary),
        ColumnSpec::new("ethnicity", ColumnKind::Binary),
        ColumnSpec::new("smoking", ColumnKind::Binary),
        ColumnSpec::new("family_history", ColumnKind::Binary),
        ColumnSpec::new("cancer", ColumnKind::Binary),
        ColumnSpec::new(TARGET, ColumnKind::Binary),
    ])?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut data = Dataset::new(schema);

    for _ in 0..rows {
        let z: f64 = rng.sample(StandardNormal);
        let age = 50.0 + 15.0 * z;
        let gender = rng.random_bool(0.5);
        let minority = rng.random_bool(0.3);
        let smoking = rng.random_bool(if minority { 0.3 } else { 0.4 });
        let family_history = rng.random_bool((0.2 + 0.05 * age / 100.0).clamp(0.0, 1.0));

        let p_cancer = 0.05 + 0.15 * indicator(smoking) + 0.1 * indicator(family_history);
        let cancer = rng.random_bool(p_cancer);

        let sensitivity = if minority { 0.75 } else { 0.9 };
        let specificity = if minority { 0.9 } else { 0.95 };
        let test_positive = if cancer {
            rng.random_bool(sensitivity)
        } else {
            rng.random_bool(1.0 - specificity)
        };

        data.push_row(vec![
            age.into(),
            indicator(gender).into(),
            indicator(minority).into(),
            indicator(smoking).into(),
            indicator(family_history).into(),
            indicator(cancer).into(),
            indicator(test_positive).into(),
        ])?;
    }
    Ok(data)
}

fn indicator(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}
