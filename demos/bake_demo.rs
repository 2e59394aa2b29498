use async_trait::async_trait;
use batter::prelude::*;
use batter::steps::base::{Echo, SetValue, ShortCircuit, Trace};
use batter::steps::mutate::Filter;
use batter::steps::text::TextSplit;
use batter::steps::validate::{Assert, Predicate, Require, Subject};
use serde_json::{json, Value};

/// Pretends to deploy a host and reports how long it took.
#[derive(Debug)]
struct Deploy;

#[async_trait]
impl Step for Deploy {
    fn params(&self) -> Value {
        json!({
            "host": "{{ store.loop.item }}",
            "region": "{{ store.params.region | upper }}",
        })
    }

    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        println!("Deploying {} in {}", params["host"], params["region"]);
        let host = params["host"].as_str().unwrap_or("unknown").replace('.', "_");
        scope.set(format!("deployed.{}", host), json!(true));
        StepResult::ok(params)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut recipe = Recipe::builder("Rollout")
        .step(SetValue::new("deployed", json!({})))
        .step(
            TextSplit::fixed(Subject::value(json!("{{ store.params.hosts }}")), ",")
                .store_as("hosts"),
        )
        .step(
            Filter::new(Subject::field("hosts"), |host| {
                host.as_str().map_or(false, |h| !h.trim().is_empty())
            })
            .store_as("targets"),
        )
        .step(Require::not_empty(Subject::field("targets")))
        .step(Section::new(
            "Canary",
            steps![
                ShortCircuit::when(
                    Subject::field("params.skip_canary"),
                    Predicate::Equal(json!(true)),
                ),
                Echo::new("canary on {{ store.targets | first }}"),
            ],
        ))
        .step(ForEach::over("store.targets", Deploy).titled("Deploy"))
        .step(Assert::all_truthy(Subject::field("deployed")))
        .step(Trace::new("rolled out {{ store.targets | length }} host(s)"))
        .step(Assert::less_than(Subject::value(json!("{{ store.targets | length }}")), 3.0))
        .build()?
        .prepare(json!({
            "hosts": "web-1,web-2,,web-3",
            "region": "eu-west",
            "skip_canary": false,
        }));

    let result = recipe.bake().await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    for trace in &result.traces {
        println!(" -> {}", trace);
    }
    for failure in result.soft_failures() {
        println!("Warning: {}", failure);
    }
    if result.aborted {
        for failure in result.hard_failures() {
            println!("Recipe failed: {}", failure);
        }
    }

    Ok(())
}
