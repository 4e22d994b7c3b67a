/// URL paths for one REST gateway flavor.
///
/// `cancel` and `modify` are templates carrying an `{order_id}` slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestEndpoints {
    pub ping: String,
    pub login: String,
    pub logout: String,
    pub order: String,
    pub cancel: String,
    pub modify: String,
    pub account: String,
    pub positions: String,
    pub orders: String,
    pub trades: String,
}

impl Default for RestEndpoints {
    fn default() -> Self {
        Self::prefixed("/api")
    }
}

impl RestEndpoints {
    /// Standard layout under a common prefix.
    fn prefixed(prefix: &str) -> Self {
        Self {
            ping: format!("{prefix}/ping"),
            login: format!("{prefix}/auth/login"),
            logout: format!("{prefix}/auth/logout"),
            order: format!("{prefix}/orders"),
            cancel: format!("{prefix}/orders/{{order_id}}/cancel"),
            modify: format!("{prefix}/orders/{{order_id}}"),
            account: format!("{prefix}/account"),
            positions: format!("{prefix}/positions"),
            orders: format!("{prefix}/orders"),
            trades: format!("{prefix}/trades"),
        }
    }

    fn flat(prefix: &str) -> Self {
        Self {
            ping: format!("{prefix}/ping"),
            login: format!("{prefix}/login"),
            logout: format!("{prefix}/logout"),
            order: format!("{prefix}/orders"),
            cancel: format!("{prefix}/orders/{{order_id}}/cancel"),
            modify: format!("{prefix}/orders/{{order_id}}"),
            account: format!("{prefix}/account"),
            positions: format!("{prefix}/positions"),
            orders: format!("{prefix}/orders"),
            trades: format!("{prefix}/trades"),
        }
    }

    pub fn huatai() -> Self {
        Self {
            ping: "/xtquant/ping".to_string(),
            login: "/xtquant/auth/login".to_string(),
            logout: "/xtquant/auth/logout".to_string(),
            order: "/xtquant/order".to_string(),
            cancel: "/xtquant/order/{order_id}/cancel".to_string(),
            modify: "/xtquant/order/{order_id}".to_string(),
            account: "/xtquant/account".to_string(),
            positions: "/xtquant/positions".to_string(),
            orders: "/xtquant/orders".to_string(),
            trades: "/xtquant/trades".to_string(),
        }
    }

    pub fn zhongxin() -> Self {
        Self::flat("/zttrade/api")
    }

    pub fn guotaijunan() -> Self {
        Self::flat("/gtja/api/v1")
    }

    pub fn haitong() -> Self {
        Self::flat("/haitong/api/v1")
    }

    pub fn guangfa() -> Self {
        Self::flat("/gf/api")
    }

    pub fn cancel_path(&self, order_id: &str) -> String {
        self.cancel.replace("{order_id}", order_id)
    }

    pub fn modify_path(&self, order_id: &str) -> String {
        self.modify.replace("{order_id}", order_id)
    }
}
