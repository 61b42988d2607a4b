//! Built-in login page served when no custom markup is configured.

pub const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Network Sign-In</title>
  <style>
    body { font-family: sans-serif; background: #f4f4f4; margin: 0; }
    .card { max-width: 320px; margin: 12vh auto; background: #fff; padding: 24px;
            border-radius: 6px; box-shadow: 0 1px 4px rgba(0,0,0,.2); }
    h1 { font-size: 1.2em; margin-top: 0; }
    input { width: 100%; box-sizing: border-box; margin: 6px 0 12px; padding: 8px; }
    button { width: 100%; padding: 10px; border: 0; background: #1a73e8; color: #fff;
             border-radius: 4px; font-size: 1em; }
    .err { color: #c00; font-size: .9em; }
  </style>
</head>
<body>
  <div class="card">
    <h1>Sign in to the network</h1>
    <p>Re-enter the Wi-Fi password to restore your connection.</p>
    <form method="post" action="/login">
      <input type="text" name="username" placeholder="Username or email">
      <input type="password" name="password" placeholder="Wi-Fi password" required>
      <button type="submit">Connect</button>
    </form>
  </div>
</body>
</html>
"#;
