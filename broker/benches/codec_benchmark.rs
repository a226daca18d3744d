use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ruleset_store::{ConfigCodec, RulesetConfig};

fn sample_config() -> RulesetConfig {
    RulesetConfig::new(
        "2024.10.7.1200",
        ["default", "annoyances", "deu-0", "fra-0", "jpn-1", "id with space"]
            .iter()
            .map(|id| id.to_string())
            .collect(),
    )
}

pub fn codec_bench(c: &mut Criterion) {
    let codec = ConfigCodec::default();
    let config = sample_config();
    let encoded = codec.encode(&config);

    c.bench_function("config_encode", |b| b.iter(|| codec.encode(black_box(&config))));
    c.bench_function("config_decode", |b| b.iter(|| codec.decode(black_box(&encoded))));
}

criterion_group!(benches, codec_bench);
criterion_main!(benches);
