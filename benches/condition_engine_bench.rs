use condition_engine::lexer::Lexer;
use condition_engine::{
    compile_script, parse_script, DocumentCompiler, OperationKind, ParameterValues, SchemaRegistry, ShapeCache,
    SqlCompiler,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

const TEST_CASES: [(&str, &str); 3] = [
    ("simple", r#"FROM Orders; WHERE Status = "Open""#),
    (
        "medium",
        r#"FROM Orders; WHERE Status = "Open" OR Total > 100 AND Note IS NOT NULL AND Flags BITS ANY 6"#,
    ),
    (
        "complex",
        r#"FROM Orders AS o;
        JOIN Customers AS c ON c.Id = o.CustomerId;
        CROSS JOIN Products AS p;
        WHERE (o.Status IN ("Open", "Held") OR c.Name ILIKE "ac%") AND o.Total BETWEEN 10 AND 500
            OR c.Vip = TRUE AND p.Price < o.Total AND o.ShipTo.City = :city"#,
    ),
];

// 基准测试：词法分析性能
fn benchmark_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_performance");

    for (name, script) in TEST_CASES {
        group.bench_with_input(BenchmarkId::new("tokenize", name), &script, |b, &script| {
            b.iter(|| {
                let tokens: Vec<_> = Lexer::new(black_box(script)).collect();
                black_box(tokens)
            })
        });
    }

    group.finish();
}

// 基准测试：语法分析性能
fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");

    for (name, script) in TEST_CASES {
        group.bench_with_input(BenchmarkId::new("parse", name), &script, |b, &script| {
            b.iter(|| match parse_script(black_box(script)) {
                Ok(ast) => black_box(ast),
                Err(_) => panic!("解析失败"),
            })
        });
    }

    group.finish();
}

// 基准测试：构建、规范化与分阶段
fn benchmark_prepare(c: &mut Criterion) {
    let schema = SchemaRegistry::default();
    let mut group = c.benchmark_group("prepare_performance");

    for (name, script) in TEST_CASES {
        let ast = parse_script(script).expect("脚本有效");
        group.bench_with_input(BenchmarkId::new("build_and_prepare", name), &ast, |b, ast| {
            b.iter(|| {
                let mut shape = ast.build_shape(OperationKind::Select, &schema).expect("构建失败");
                black_box(shape.prepare().expect("准备失败"))
            })
        });
    }

    group.finish();
}

// 基准测试：后端渲染性能
fn benchmark_backends(c: &mut Criterion) {
    let schema = SchemaRegistry::default();
    let compiler = SqlCompiler::new(schema.clone());
    let documents = DocumentCompiler::new(&schema);
    let values = ParameterValues::new().bind("city", "Berlin");
    let mut group = c.benchmark_group("backend_performance");

    for (name, script) in TEST_CASES {
        let prepared = compile_script(script, OperationKind::Select, &schema)
            .and_then(|mut shape| shape.prepare())
            .expect("脚本有效");

        group.bench_with_input(BenchmarkId::new("sql", name), &prepared, |b, prepared| {
            b.iter(|| black_box(compiler.compile(prepared, &values).expect("编译失败")))
        });
        group.bench_with_input(BenchmarkId::new("document", name), &prepared, |b, prepared| {
            b.iter(|| black_box(documents.render_stage_filters(prepared, &values).expect("渲染失败")))
        });
    }

    group.finish();
}

// 基准测试：缓存命中
fn benchmark_shape_cache(c: &mut Criterion) {
    let schema = SchemaRegistry::default();
    let cache: ShapeCache<&str> = ShapeCache::new();
    let (_, script) = TEST_CASES[2];

    c.bench_function("shape_cache_hit", |b| {
        b.iter(|| {
            let prepared = cache
                .get_or_prepare(black_box(script), || compile_script(script, OperationKind::Select, &schema))
                .expect("准备失败");
            black_box(prepared)
        })
    });
}

criterion_group!(
    benches,
    benchmark_lexer,
    benchmark_parser,
    benchmark_prepare,
    benchmark_backends,
    benchmark_shape_cache
);
criterion_main!(benches);
