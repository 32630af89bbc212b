use std::sync::Arc;

use bot_builder::storage::shared_memory_storage;
use bot_builder::testkit::{TestAdapter, TestFlow};
use bot_schema::{Activity, ChannelAccount};
use echo_bot::EchoBot;

#[tokio::test]
async fn collects_a_profile_then_echoes() {
    TestFlow::new(TestAdapter::new(), EchoBot::new(shared_memory_storage()))
        .test("hi", "What is your name?")
        .test("Ann", "Nice to meet you, Ann. How old are you?")
        .test("200", "Please enter an age between 1 and 149.")
        .test("I am 34", "Thanks Ann, I'll remember you are 34.")
        .test("hello again", "Ann said: hello again")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn reset_forgets_the_profile() {
    TestFlow::new(TestAdapter::new(), EchoBot::new(shared_memory_storage()))
        .test("hi", "What is your name?")
        .test("Ann", "Nice to meet you, Ann. How old are you?")
        .test("34", "Thanks Ann, I'll remember you are 34.")
        .test("Reset", "Your profile has been cleared.")
        .test("hi", "What is your name?")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn profiles_follow_the_user_across_conversations() {
    let storage = shared_memory_storage();
    TestFlow::new(TestAdapter::new(), EchoBot::new(storage.clone()))
        .test("hi", "What is your name?")
        .test("Ann", "Nice to meet you, Ann. How old are you?")
        .test("34", "Thanks Ann, I'll remember you are 34.")
        .start_test()
        .await
        .unwrap();

    let elsewhere = TestAdapter::with_reference(TestAdapter::create_conversation_reference(
        "Convo2", "user1", "bot",
    ));
    TestFlow::with_shared_bot(elsewhere, Arc::new(EchoBot::new(storage)))
        .test("still there?", "Ann said: still there?")
        .start_test()
        .await
        .unwrap();
}

#[tokio::test]
async fn greets_members_other_than_the_bot() {
    let adapter = TestAdapter::new();
    let bot = EchoBot::new(shared_memory_storage());

    let mut update = Activity::create_conversation_update_activity();
    update.members_added = vec![
        ChannelAccount::new("bot").with_name("Bot"),
        ChannelAccount::new("user1").with_name("Ann"),
        ChannelAccount::new("user2"),
    ];
    adapter.process_activity(update, &bot).await.unwrap();

    assert_eq!(
        adapter.get_next_reply().unwrap().text(),
        "Hello and welcome, Ann! Say anything to get started."
    );
    assert_eq!(
        adapter.get_next_reply().unwrap().text(),
        "Hello and welcome! Say anything to get started."
    );
    assert!(adapter.get_next_reply().is_none());
}
