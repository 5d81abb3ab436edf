use daybook_common::{CancelFlag, Tier, TierUsed};
use daybook_pipeline::testing::{
    article, day, labels, significant, sized, MockSource, Mocks, ScriptedProvider,
};
use daybook_pipeline::{ArticleLabel, Resolution, SelectionMode};

#[tokio::test]
async fn waterfall_stops_at_first_significant_tier() {
    let date = day(2024, 12, 1);
    let mocks = Mocks::new(
        MockSource::new().on(date, Tier::Primary, vec![article("p1", 0.9)]),
        ScriptedProvider::new("openai")
            .judge(date, Tier::Primary, significant("p1"))
            .summary("p1", sized(104)),
    );

    let resolution = mocks.resolver().waterfall(date, &CancelFlag::new()).await;

    let Resolution::Resolved(selected) = resolution else {
        panic!("expected a resolved selection, got {resolution:?}");
    };
    assert_eq!(selected.article_id, "p1");
    assert_eq!(selected.tier, Tier::Primary);
    assert_eq!(selected.summary.chars().count(), 104);
    assert_eq!(mocks.source.calls(), vec![(date, Tier::Primary)]);

    let analysis = selected.into_analysis();
    assert_eq!(analysis.tier_used, Some(TierUsed::Primary));
    assert_eq!(analysis.ai_provider.as_deref(), Some("openai"));
}

#[tokio::test]
async fn waterfall_falls_through_to_broad() {
    let date = day(2024, 6, 3);
    let mocks = Mocks::new(
        MockSource::new()
            .on(date, Tier::Primary, vec![article("p1", 0.4)])
            .on(date, Tier::Broad, vec![article("b1", 0.7), article("b2", 0.6)]),
        ScriptedProvider::new("openai").judge(date, Tier::Broad, significant("b2")),
    );

    let resolution = mocks.resolver().waterfall(date, &CancelFlag::new()).await;

    let Resolution::Resolved(selected) = resolution else {
        panic!("expected a resolved selection, got {resolution:?}");
    };
    assert_eq!(selected.article_id, "b2");
    assert_eq!(selected.tier, Tier::Broad);
    assert_eq!(selected.tiered_articles.get(Tier::Primary).len(), 1);
    assert!(selected.reasoning.contains("[primary]"));
    assert!(selected.reasoning.contains("[broad]"));
}

#[tokio::test]
async fn significant_macro_tier_is_never_summarized() {
    let date = day(2024, 8, 5);
    let mocks = Mocks::new(
        MockSource::new().on(date, Tier::Macro, vec![article("m1", 0.8)]),
        ScriptedProvider::new("openai").judge(date, Tier::Macro, significant("m1")),
    );

    let resolution = mocks.resolver().waterfall(date, &CancelFlag::new()).await;

    let Resolution::Unresolved(unresolved) = resolution else {
        panic!("expected unresolved, got {resolution:?}");
    };
    assert_eq!(unresolved.winning_tier, Some(Tier::Macro));
    assert_eq!(mocks.writer.calls("summarize"), 0);
    let analysis = unresolved.into_analysis();
    assert!(analysis.summary.is_empty());
    assert!(analysis.top_article_id.is_none());
}

#[tokio::test]
async fn cancelled_waterfall_does_no_work() {
    let date = day(2024, 1, 1);
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));
    let cancel = CancelFlag::new();
    cancel.cancel();

    let resolution = mocks.resolver().waterfall(date, &cancel).await;

    assert_eq!(resolution, Resolution::Cancelled);
    assert!(mocks.source.calls().is_empty());
    assert_eq!(mocks.writer.total_calls(), 0);
}

#[tokio::test]
async fn dual_verification_picks_within_intersection() {
    let date = day(2024, 4, 20);
    let mocks = Mocks::new(
        MockSource::new()
            .on(date, Tier::Primary, vec![article("a", 0.9), article("b", 0.8)])
            .on(date, Tier::Broad, vec![article("c", 0.7)]),
        // The pick names an article outside the intersection and is ignored.
        ScriptedProvider::new("openai").pick(date, Some("a")),
    )
    .labelers(
        ScriptedProvider::new("claude").labels(date, labels(&["a", "b", "c"])),
        ScriptedProvider::new("perplexity").labels(
            date,
            vec![
                ArticleLabel {
                    id: "https://news.example.com/b/".into(),
                    score: Some(0.4),
                },
                ArticleLabel {
                    id: "c".into(),
                    score: Some(0.9),
                },
            ],
        ),
    );

    let resolution = mocks.resolver().dual_verification(date, &CancelFlag::new()).await;

    let Resolution::Resolved(selected) = resolution else {
        panic!("expected a resolved selection, got {resolution:?}");
    };
    assert_eq!(selected.article_id, "c");
    assert_eq!(selected.tier, Tier::Broad);
    assert!(["b", "c"].contains(&selected.article_id.as_str()));
}

#[tokio::test]
async fn dual_verification_uses_pick_inside_intersection() {
    let date = day(2024, 4, 21);
    let mocks = Mocks::new(
        MockSource::new().on(date, Tier::Primary, vec![article("a", 0.9), article("b", 0.8)]),
        ScriptedProvider::new("openai").pick(date, Some("https://news.example.com/b")),
    )
    .labelers(
        ScriptedProvider::new("claude").labels(date, labels(&["a", "b"])),
        ScriptedProvider::new("perplexity").labels(date, labels(&["b", "a"])),
    );

    let resolution = mocks.resolver().dual_verification(date, &CancelFlag::new()).await;

    let Resolution::Resolved(selected) = resolution else {
        panic!("expected a resolved selection, got {resolution:?}");
    };
    assert_eq!(selected.article_id, "b");
}

#[tokio::test]
async fn empty_intersection_requires_selection() {
    let date = day(2024, 9, 9);
    let mocks = Mocks::new(
        MockSource::new()
            .on(date, Tier::Primary, vec![article("x", 0.9)])
            .on(date, Tier::Macro, vec![article("y", 0.5)]),
        ScriptedProvider::new("openai").pick(date, Some("x")),
    )
    .labelers(
        ScriptedProvider::new("claude").labels(date, labels(&["x"])),
        ScriptedProvider::new("perplexity").labels(date, labels(&["y"])),
    );

    let resolution = mocks.resolver().dual_verification(date, &CancelFlag::new()).await;

    let Resolution::RequiresSelection(request) = resolution else {
        panic!("expected a selection request, got {resolution:?}");
    };
    assert_eq!(request.mode, SelectionMode::NoAgreement);
    assert_eq!(request.tiered_articles.total(), 2);
    assert_eq!(request.first_labels.article_ids, vec!["x".to_string()]);
    assert_eq!(request.second_labels.article_ids, vec!["y".to_string()]);
    assert_eq!(request.suggested_article_id.as_deref(), Some("x"));
    assert_eq!(mocks.writer.calls("summarize"), 0);
}

#[tokio::test]
async fn failed_labeller_counts_as_no_labels() {
    let date = day(2024, 9, 10);
    let mocks = Mocks::new(
        MockSource::new().on(date, Tier::Primary, vec![article("x", 0.9)]),
        ScriptedProvider::new("openai"),
    )
    .labelers(
        ScriptedProvider::new("claude").labels(date, labels(&["x"])),
        ScriptedProvider::new("perplexity").failing("label_articles"),
    );

    let resolution = mocks.resolver().dual_verification(date, &CancelFlag::new()).await;

    let Resolution::RequiresSelection(request) = resolution else {
        panic!("expected a selection request, got {resolution:?}");
    };
    assert!(request.second_labels.error.is_some());
    assert!(request.second_labels.article_ids.is_empty());
}

#[tokio::test]
async fn no_articles_at_all_requires_selection() {
    let date = day(2010, 1, 1);
    let mocks = Mocks::new(MockSource::new(), ScriptedProvider::new("openai"));

    let resolution = mocks.resolver().dual_verification(date, &CancelFlag::new()).await;

    let Resolution::RequiresSelection(request) = resolution else {
        panic!("expected a selection request, got {resolution:?}");
    };
    assert_eq!(request.mode, SelectionMode::NoArticles);
    assert_eq!(mocks.labelers[0].calls("label_articles"), 0);
}
