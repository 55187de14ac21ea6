//! Benchmarks pour l'analyse des chevauchements et l'agrégation des conflits

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use geo::{polygon, Geometry};
use serde_json::{json, Map, Value};

use leve::{extract, ExtractionOptions, Parcel, PolygonBuilder, RecognizedText};
use leve_verif::config::Config;
use leve_verif::conflicts::ConflictAggregator;
use leve_verif::overlap::OverlapAnalyzer;
use leve_verif::spatial::MemoryLayers;

const SCENARIO: &str = "B1 401374.38 712334.71 B2 401378.12 712287.17 B3 401353.24 712284.56 B4 401349.45 712332.75";

fn scenario_parcel() -> Parcel {
    let sources = vec![RecognizedText::new("bench", SCENARIO)];
    let outcome = extract(&sources, &ExtractionOptions::default()).unwrap();
    PolygonBuilder::default()
        .build(&outcome.resolution.points)
        .unwrap()
}

/// Grille de `side` x `side` parcelles de 20 m autour de la parcelle du scénario
fn grid_layers(config: &Config, side: u32) -> MemoryLayers {
    let mut layers = MemoryLayers::new();
    for layer in &config.layers {
        for i in 0..side {
            for j in 0..side {
                let x = 401_200.0 + f64::from(i) * 20.0;
                let y = 712_150.0 + f64::from(j) * 20.0;
                let mut properties = Map::new();
                properties.insert("nup".into(), json!(format!("P-{}-{}", i, j)));
                properties.insert("num_tf".into(), Value::Null);
                let square = polygon![
                    (x: x, y: y),
                    (x: x + 20.0, y: y),
                    (x: x + 20.0, y: y + 20.0),
                    (x: x, y: y + 20.0),
                    (x: x, y: y),
                ];
                layers.insert(layer, (i * side + j) as usize, properties, Geometry::Polygon(square));
            }
        }
    }
    layers
}

fn bench_analyze(c: &mut Criterion) {
    let config = Config::from_preset("benin").unwrap();
    let parcel = scenario_parcel();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("overlap_analysis");
    for side in [10u32, 30] {
        let analyzer = OverlapAnalyzer::new(
            Arc::new(grid_layers(&config, side)),
            config.layers.clone(),
            Duration::from_secs(10),
            config.nearby_distance,
        );
        group.throughput(Throughput::Elements(u64::from(side * side) * config.layers.len() as u64));
        group.bench_function(format!("grid_{}x{}", side, side), |b| {
            b.to_async(&runtime)
                .iter(|| async { black_box(analyzer.analyze(black_box(&parcel)).await) })
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let config = Config::from_preset("benin").unwrap();
    let parcel = scenario_parcel();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let analyzer = OverlapAnalyzer::new(
        Arc::new(grid_layers(&config, 30)),
        config.layers.clone(),
        Duration::from_secs(10),
        config.nearby_distance,
    );
    let outcome = runtime.block_on(analyzer.analyze(&parcel));
    let aggregator = ConflictAggregator::new(config.layers.clone());

    c.bench_function("aggregate_grid_30x30", |b| {
        b.iter(|| black_box(aggregator.aggregate(parcel.clone(), black_box(&outcome))))
    });
}

criterion_group!(benches, bench_analyze, bench_aggregate);
criterion_main!(benches);
