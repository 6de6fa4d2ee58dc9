//! Page fixtures shared by the integration tests.

/// A page whose `<main>` clears the extractor's region threshold.
pub const RICH_ARTICLE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>The Hitchhiker's Guide</title>
    <meta name="description" content="Answers to life's big questions">
    <script>window.analytics = "should never be scraped";</script>
</head>
<body>
    <nav>Home | About | Contact</nav>
    <main>
        <h1>The Ultimate Question</h1>
        <p>After seven and a half million years of computation, the supercomputer
        Deep Thought announced that the answer to the ultimate question of life,
        the universe, and everything is forty-two.</p>
    </main>
    <footer>Copyright Megadodo Publications</footer>
</body>
</html>"#;

/// A client-rendered shell with almost no server-side text.
pub const SPA_SHELL_HTML: &str =
    r#"<html><body><div id="root">Loading...</div><script src="/app.js"></script></body></html>"#;
