use newsdesk::analysis::{Analyzer, Briefer};
use newsdesk::error::AnalysisError;
use newsdesk::llm::analyst::LlmAnalyst;
use newsdesk::llm::remote::RemoteLlmProvider;
use mockito::Matcher;
use newsdesk::llm::{LlmProvider, LlmRequest};
use newsdesk::model::Article;
use newsdesk::preferences::{CategoryWeight, Preferences};
use std::sync::Arc;

fn completion(content: &str) -> String {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
    })
    .to_string()
}

fn article() -> Article {
    Article {
        id: "https://example.org/chips".into(),
        title: "New export rules for chips".into(),
        link: "https://example.org/chips".into(),
        source: "Ars Technica".into(),
        category: "Technology".into(),
        subcategory: None,
        content_snippet: "Regulators published new rules on Tuesday.".into(),
        published_at: chrono::Utc::now(),
        analysis: None,
    }
}

#[tokio::test]
async fn completion_round_trip_with_auth_and_usage() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "gpt-4o-mini",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "Test prompt"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("This is a test response"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let mut request = LlmRequest::new("Test prompt").with_temperature(0.7).with_timeout(10);
    request.max_tokens = Some(100);

    let response = provider.generate(request).await.unwrap();
    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.usage.prompt_tokens, 100);
    assert_eq!(response.usage.completion_tokens, 50);
    assert_eq!(response.usage.total_tokens, 150);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn keyless_local_endpoint_and_empty_reply() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(completion("   "))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "", "llama3");
    let err = provider.generate(LlmRequest::new("hello")).await.unwrap_err();
    assert!(err.to_string().contains("empty message"));

    mock.assert_async().await;
}

#[tokio::test]
async fn analyst_over_remote_provider() {
    let mut server = mockito::Server::new_async().await;

    let analysis = r#"{"summary": "New rules restrict exports.", "generalRelevance": 7,
        "factCheck": {"summary": "Rules are on the regulator's site.", "findings": [
            {"claim": "Rules published Tuesday", "verdict": "Verified", "source": "https://example.gov/rules"}]},
        "perspectives": [{"viewpoint": "Industry", "summary": "Costs rise."}]}"#;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(serde_json::json!({"response_format": {"type": "json_object"}})),
            Matcher::Regex("\"role\":\"system\"".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(&format!("```json\n{}\n```", analysis)))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let analyst = LlmAnalyst::new(Arc::new(provider));
    let prefs = Preferences {
        categories: vec![CategoryWeight::new("Technology", 5)],
        ..Default::default()
    };

    let result = analyst.analyze(&article(), &prefs).await.unwrap();
    assert_eq!(result.general_relevance, 7);
    // 3 baseline + 5 category weight
    assert_eq!(result.personal_relevance, 8);
    assert_eq!(result.fact_check.findings.len(), 1);
    assert_eq!(result.perspectives[0].viewpoint, "Industry");

    mock.assert_async().await;
}

#[tokio::test]
async fn briefing_over_remote_provider() {
    let mut server = mockito::Server::new_async().await;

    let briefing = r#"{"title": "Chips and Charts", "executiveSummary": "Export rules dominate.",
        "keyDevelopments": [{"summary": "Rules tightened", "sourceTitle": "New export rules for chips", "sourceUrl": "https://example.org/chips"}],
        "perspectives": [{"viewpoint": "Trade", "summary": "Partners object."}]}"#;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(briefing))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let analyst = LlmAnalyst::new(Arc::new(provider));
    let out = analyst
        .write_briefing(&[article()], &Preferences::default())
        .await
        .unwrap();
    assert_eq!(out.title, "Chips and Charts");
    assert_eq!(out.key_developments[0].source_url, "https://example.org/chips");
}

#[tokio::test]
async fn rate_limit_surfaces_status_and_maps_to_upstream() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .expect(2)
        .create_async()
        .await;

    let provider = Arc::new(RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini"));
    let err = provider.generate(LlmRequest::new("Test")).await.unwrap_err();
    assert!(err.to_string().contains("429"));

    let analyst = LlmAnalyst::new(provider);
    let result = analyst.analyze(&article(), &Preferences::default()).await;
    assert!(matches!(result, Err(AnalysisError::Upstream(ref m)) if m.contains("Rate limit")));

    mock.assert_async().await;
}

#[tokio::test]
async fn slow_body_hits_the_timeout() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let result = provider.generate(LlmRequest::new("Test").with_timeout(1)).await;

    assert!(result.unwrap_err().to_string().contains("timed out"));
}
