use std::sync::{Arc, Mutex};

use anyhow::ensure;
use async_trait::async_trait;
use bot_ai_qna::{QnAMaker, QnAMakerDialog, QnAMakerEndpoint};
use bot_builder::bot::bot_fn;
use bot_builder::testkit::{TestAdapter, TestFlow};
use bot_builder::{Bot, ConversationState, MemoryStorage};
use bot_connector::{ConnectorError, HttpTransport, JsonRequest};
use bot_dialogs::DialogManager;
use bot_schema::Activity;
use serde_json::{Value, json};

/// A knowledge base about routers. Training calls are recorded and
/// answered with an empty body.
#[derive(Default)]
struct RouterKnowledgeBase {
    requests: Mutex<Vec<JsonRequest>>,
}

impl RouterKnowledgeBase {
    fn requests(&self) -> Vec<JsonRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn answer(body: &Value) -> Value {
        if body["qnaId"] == json!(13) {
            return json!({
                "answers": [
                    { "questions": ["Still broken?"], "answer": "Call support on 555-0100.", "score": 100.0, "id": 13 }
                ]
            });
        }
        match body["question"].as_str().unwrap_or_default() {
            "router help" => json!({
                "activeLearningEnabled": true,
                "answers": [
                    { "questions": ["Reset the router"], "answer": "Hold the reset button.", "score": 60.0, "id": 3 },
                    { "questions": ["Update firmware"], "answer": "Download it from the admin page.", "score": 58.0, "id": 7 },
                    { "questions": ["Change the password"], "answer": "Open settings, then security.", "score": 55.0, "id": 9 }
                ]
            }),
            "how do I reset?" => json!({
                "answers": [{
                    "questions": ["how do I reset?"],
                    "answer": "Hold the reset button.",
                    "score": 90.0,
                    "id": 12,
                    "context": {
                        "isContextOnly": false,
                        "prompts": [{ "displayOrder": 0, "qnaId": 13, "displayText": "Still broken?" }]
                    }
                }]
            }),
            _ => json!({ "answers": [] }),
        }
    }
}

#[async_trait]
impl HttpTransport for RouterKnowledgeBase {
    async fn post_json(&self, request: JsonRequest) -> Result<Value, ConnectorError> {
        let response = if request.url.ends_with("/train") {
            json!({})
        } else {
            Self::answer(&request.body)
        };
        self.requests.lock().unwrap().push(request);
        Ok(response)
    }
}

fn qna_bot(kb: Arc<RouterKnowledgeBase>) -> impl Bot {
    let qna = QnAMaker::new(
        QnAMakerEndpoint::new("kb-1", "secret", "https://example.azurewebsites.net/qnamaker/"),
        None,
    )
    .unwrap()
    .with_transport(kb);
    let manager = Arc::new(DialogManager::new(
        QnAMakerDialog::new("qna", Arc::new(qna)),
        ConversationState::new(Arc::new(MemoryStorage::new())),
    ));
    bot_fn(move |ctx| {
        let manager = manager.clone();
        Box::pin(async move {
            manager.on_turn(ctx).await?;
            Ok(())
        })
    })
}

fn button_titles(activity: &Activity) -> Vec<String> {
    activity
        .attachments
        .first()
        .and_then(|attachment| attachment.content.as_ref())
        .and_then(|content| content["buttons"].as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|button| button["title"].as_str().map(str::to_string))
        .collect()
}

fn generate_answer_requests(kb: &RouterKnowledgeBase) -> Vec<JsonRequest> {
    kb.requests()
        .into_iter()
        .filter(|request| request.url.ends_with("/generateanswer"))
        .collect()
}

#[tokio::test]
async fn close_answers_are_offered_and_the_pick_is_trained() {
    let kb = Arc::new(RouterKnowledgeBase::default());

    TestFlow::new(TestAdapter::new(), qna_bot(kb.clone()))
        .send("router help")
        .assert_reply_with(|reply| {
            ensure!(reply.text() == "Did you mean:", "unexpected card title {:?}", reply.text());
            ensure!(
                button_titles(reply)
                    == ["Reset the router", "Update firmware", "Change the password", "None of the above."],
                "unexpected buttons {:?}",
                button_titles(reply)
            );
            Ok(())
        })
        .test("Update firmware", "Download it from the admin page.")
        .start_test()
        .await
        .unwrap();

    let requests = kb.requests();
    assert_eq!(requests.len(), 2);
    let train = &requests[1];
    assert_eq!(
        train.url,
        "https://example.azurewebsites.net/qnamaker/knowledgebases/kb-1/train"
    );
    let record = &train.body["feedbackRecords"][0];
    assert_eq!(record["userQuestion"], json!("router help"));
    assert_eq!(record["qnaId"], json!(7));
    assert!(!record["userId"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn declining_the_suggestions_sends_no_feedback() {
    let kb = Arc::new(RouterKnowledgeBase::default());

    TestFlow::new(TestAdapter::new(), qna_bot(kb.clone()))
        .test("router help", "Did you mean:")
        .test("none of the above.", "Thanks for the feedback.")
        .test("router help", "Did you mean:")
        .start_test()
        .await
        .unwrap();

    assert_eq!(kb.requests().len(), 2);
    assert_eq!(generate_answer_requests(&kb).len(), 2);
}

#[tokio::test]
async fn an_unrelated_reply_is_asked_as_a_new_question() {
    let kb = Arc::new(RouterKnowledgeBase::default());

    TestFlow::new(TestAdapter::new(), qna_bot(kb.clone()))
        .test("router help", "Did you mean:")
        .test("pizza", "No QnAMaker answers found.")
        .start_test()
        .await
        .unwrap();

    let questions: Vec<Value> = generate_answer_requests(&kb)
        .iter()
        .map(|request| request.body["question"].clone())
        .collect();
    assert_eq!(questions, [json!("router help"), json!("pizza")]);
}

#[tokio::test]
async fn follow_up_prompts_query_in_the_context_of_the_previous_answer() {
    let kb = Arc::new(RouterKnowledgeBase::default());

    TestFlow::new(TestAdapter::new(), qna_bot(kb.clone()))
        .send("how do I reset?")
        .assert_reply_with(|reply| {
            ensure!(reply.text() == "Hold the reset button.", "unexpected answer {:?}", reply.text());
            ensure!(button_titles(reply) == ["Still broken?"], "unexpected prompts {:?}", button_titles(reply));
            Ok(())
        })
        .test("Still broken?", "Call support on 555-0100.")
        .test("what is this?", "No QnAMaker answers found.")
        .start_test()
        .await
        .unwrap();

    let requests = generate_answer_requests(&kb);
    assert_eq!(requests.len(), 3);
    let follow_up = &requests[1].body;
    assert_eq!(follow_up["qnaId"], json!(13));
    assert_eq!(follow_up["context"]["previousQnAId"], json!(12));
    assert_eq!(requests[2].body["qnaId"], json!(0));
}
