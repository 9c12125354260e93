//! 用户管理服务库
//! 账户注册登录、JWT 认证与角色授权、风险报告用量上报

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
