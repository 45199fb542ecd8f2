use anyhow::{anyhow, bail, Context, Result};
use condition_engine::lexer::Lexer;
use condition_engine::logging::init_tracing;
use condition_engine::{
    parse_script, ConditionTree, DocumentCompiler, FrozenSlot, OperationKind, ParameterValues,
    PreparedQuery, SchemaRegistry, ShapeCache, SqlCompiler, Value,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value as Json;
use std::sync::Arc;

const SAMPLE_SCRIPT: &str = r#"FROM Orders AS o;
JOIN Customers AS c ON c.Id = o.CustomerId;
CROSS JOIN Products AS p;
WHERE o.Status = "Open" OR (o.Total > 100 AND c.Vip = TRUE) AND o.Note IS NOT NULL"#;

/// 加载模式注册表，优先使用 schema.json，失败时使用默认模式
fn load_schema() -> SchemaRegistry {
    match SchemaRegistry::from_json_file("schema.json") {
        Ok(schema) => {
            println!("✅ 成功从JSON配置文件加载模式: schema.json");
            schema
        }
        Err(e) => {
            println!("⚠️ 无法加载JSON配置文件 ({}), 使用默认模式", e);
            SchemaRegistry::default()
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    println!("--- Condition Engine: 查询脚本到 SQL / 文档过滤器 ---");

    println!("\n[配置信息]:");
    let schema = load_schema();
    for (name, container) in &schema.containers {
        println!(
            "  {} -> {} ({} 个字段)",
            name,
            schema.storage_container(name),
            container.fields.len()
        );
    }

    // SQL 编译器在首次编译时构建，之后共享
    let compiler = FrozenSlot::new();

    println!("\n[输入脚本]:\n{}\n", SAMPLE_SCRIPT);
    run_pipeline(SAMPLE_SCRIPT, &schema, &compiler)?;

    repl(&schema, &compiler)
}

/// 逐步展示脚本的处理流程
fn run_pipeline(script: &str, schema: &SchemaRegistry, compiler: &FrozenSlot<SqlCompiler>) -> Result<()> {
    // 1. 词法分析
    println!("[步骤 1]: 对脚本进行分词...");
    let tokens: Vec<_> = Lexer::new(script).collect();
    println!("生成了 {} 个 token", tokens.len());

    // 2. 语法分析
    println!("\n[步骤 2]: 将 token 解析为步骤序列...");
    let ast = parse_script(script).map_err(|e| anyhow!("解析失败: {}", e))?;
    println!("✓ {} 个连接, {} 个 WHERE 步骤", ast.joins.len(), ast.steps.len());

    // 3. 回放到构建器
    println!("\n[步骤 3]: 回放到条件构建器并规范化...");
    let mut shape = ast.build_shape(OperationKind::Select, schema)?;
    let prepared = shape.prepare()?;
    println!("扁平形式: {}", prepared.conditions);
    if let Some(tree) = ConditionTree::build(prepared.conditions.conditions())? {
        println!("树形式:   {}", tree);
    }

    // 4. 执行计划
    println!("\n[步骤 4]: 容器排序与分阶段...");
    print!("{}", prepared.plan);

    // 5. 后端
    print_backends(&prepared, schema, compiler, &ParameterValues::new())
}

fn print_backends(
    prepared: &PreparedQuery,
    schema: &SchemaRegistry,
    compiler: &FrozenSlot<SqlCompiler>,
    values: &ParameterValues,
) -> Result<()> {
    println!("\n[生成的 SQL]:");
    let compiler = compiler.get_or_try_init(|| Ok(SqlCompiler::new(schema.clone())))?;
    let sql = compiler.compile(prepared, values)?;
    println!("{}", sql);

    println!("\n[文档过滤器]:");
    let stages = DocumentCompiler::new(schema).render_stage_filters(prepared, values)?;
    for (index, stage) in stages.iter().enumerate() {
        let connect = stage.connect.clone().map(Json::Object).unwrap_or(Json::Null);
        let filter = stage.filter.clone().map(Json::Object).unwrap_or(Json::Null);
        println!("  阶段 {} ({}): on={} filter={}", index, stage.alias, connect, filter);
    }
    Ok(())
}

fn parse_kind(text: &str) -> Result<OperationKind> {
    Ok(match text {
        "select" => OperationKind::Select,
        "update" => OperationKind::Update,
        "delete" => OperationKind::Delete,
        "soft-delete" => OperationKind::SoftDelete,
        "restore" => OperationKind::Restore,
        other => bail!("未知的操作类型: {}", other),
    })
}

/// JSON 字面量转换为参数值
fn json_to_value(json: &Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Float64(n.as_f64().context("数字超出范围")?),
        },
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(json_to_value).collect::<Result<_>>()?),
        Json::Object(_) => bail!("参数值不能是对象"),
    })
}

const HELP: &str = r#"命令:
  :kind select|delete|soft-delete|restore   设置操作类型
  :bind 名称 JSON值                          绑定参数, 例如 :bind status "Open"
  :params                                    显示已绑定的参数
  :help                                      显示帮助
  :quit                                      退出
其余输入作为查询脚本处理"#;

/// 交互式命令行：输入脚本，输出 SQL 与文档过滤器
fn repl(schema: &SchemaRegistry, compiler: &FrozenSlot<SqlCompiler>) -> Result<()> {
    println!("\n--- 交互模式 (:help 查看命令) ---");
    let mut editor = DefaultEditor::new()?;
    let cache: ShapeCache<(OperationKind, String)> = ShapeCache::new();
    let mut kind = OperationKind::Select;
    let mut values = ParameterValues::new();
    let mut bound: Vec<(String, Json)> = Vec::new();

    loop {
        let line = match editor.readline(&format!("{}> ", kind)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        editor.add_history_entry(line)?;

        if let Some(command) = line.strip_prefix(':') {
            let mut parts = command.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("quit" | "q"), _, _) => break,
                (Some("help"), _, _) => println!("{}", HELP),
                (Some("kind"), Some(name), None) => match parse_kind(name) {
                    Ok(parsed) => kind = parsed,
                    Err(e) => println!("✗ {}", e),
                },
                (Some("bind"), Some(name), Some(raw)) => {
                    let bound_value = serde_json::from_str::<Json>(raw)
                        .context("参数值必须是 JSON")
                        .and_then(|json| Ok((json_to_value(&json)?, json)));
                    match bound_value {
                        Ok((value, json)) => {
                            values.insert(name, value);
                            bound.retain(|(existing, _)| existing != name);
                            bound.push((name.to_string(), json));
                        }
                        Err(e) => println!("✗ {:#}", e),
                    }
                }
                (Some("params"), _, _) => {
                    for (name, json) in &bound {
                        println!("  :{} = {}", name, json);
                    }
                }
                _ => println!("✗ 未知命令，输入 :help 查看帮助"),
            }
            continue;
        }

        let prepared: Result<Arc<PreparedQuery>> = cache
            .get_or_prepare((kind, line.to_string()), || {
                parse_script(line)?.build_shape(kind, schema)
            })
            .map_err(Into::into);
        match prepared.and_then(|prepared| {
            println!("扁平形式: {}", prepared.conditions);
            print_backends(&prepared, schema, compiler, &values)
        }) {
            Ok(()) => {}
            Err(e) => println!("✗ {}", e),
        }
    }

    println!("再见");
    Ok(())
}
