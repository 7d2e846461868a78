//! Lua 脚本
//!
//! 所有"读-判断-写"组合都在脚本内完成，Redis 单线程执行保证原子性。
//! 时间由调用方通过参数传入（毫秒）。

use once_cell::sync::Lazy;
use redis::Script;

/// 拼接会话键、黑名单写入等公共函数
const PRELUDE: &str = r#"
local function session_key(prefix, id)
    return prefix .. ':session:' .. id
end

local function blacklist(prefix, token_id, expires_at, now)
    if not token_id or token_id == '' then
        return
    end
    local remaining = tonumber(expires_at or '0') - now
    if remaining < 1000 then
        remaining = 1000
    end
    redis.call('SET', prefix .. ':blacklist:' .. token_id, '1', 'PX', remaining)
end
"#;

fn with_prelude(body: &str) -> Script {
    Script::new(&format!("{}\n{}", PRELUDE, body))
}

/// 固定窗口配额申请
///
/// KEYS[1] 计数器；ARGV[1] 上限，ARGV[2] 窗口毫秒。
/// 达到上限后拒绝且不递增；返回 {allowed, count, ttl_ms}。
pub(crate) static ACQUIRE_PERMIT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local max = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local current = tonumber(redis.call('GET', KEYS[1]) or '0')

        local allowed = 0
        if current < max then
            current = redis.call('INCR', KEYS[1])
            allowed = 1
        end

        local ttl = redis.call('PTTL', KEYS[1])
        if ttl == -1 then
            -- 计数器丢失过期时间时补上，避免永久锁死
            redis.call('PEXPIRE', KEYS[1], window)
            ttl = window
        elseif ttl == -2 then
            ttl = window
        end

        return {allowed, current, ttl}
        "#,
    )
});

/// 递增并重置过期时间
///
/// KEYS[1] 计数器；ARGV[1] TTL 毫秒。
pub(crate) static INCREMENT_SLIDING: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = redis.call('INCR', KEYS[1])
        redis.call('PEXPIRE', KEYS[1], ARGV[1])
        return current
        "#,
    )
});

/// 滑动窗口内有余量时记录事件
///
/// KEYS[1] 有序集合；ARGV[1] 当前毫秒，ARGV[2] 窗口毫秒，ARGV[3] 上限，ARGV[4] 成员。
/// 返回 1 表示已记录，0 表示已达上限。
pub(crate) static TRY_RECORD_EVENT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local max = tonumber(ARGV[3])
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)

        if redis.call('ZCARD', KEYS[1]) >= max then
            return 0
        end

        redis.call('ZADD', KEYS[1], now, ARGV[4])
        redis.call('PEXPIRE', KEYS[1], window)
        return 1
        "#,
    )
});

/// 在并发上限内创建会话
///
/// KEYS[1] 设备索引，KEYS[2] 会话记录，KEYS[3] 刷新令牌指针。
/// ARGV[1] 键前缀，ARGV[2] 上限（0 不限制），ARGV[3] 策略（reject / evict），
/// ARGV[4] 当前毫秒，ARGV[5] 会话 TTL 毫秒，ARGV[6] 会话 ID，ARGV[7..] 记录字段。
///
/// 索引中记录已不存在的条目先被清理。返回 {'rejected', 现有会话...}
/// 或 {'admitted', 被踢出会话...}。
pub(crate) static CREATE_SESSION: Lazy<Script> = Lazy::new(|| {
    with_prelude(
        r#"
        local prefix = ARGV[1]
        local max = tonumber(ARGV[2])
        local policy = ARGV[3]
        local now = tonumber(ARGV[4])
        local ttl = tonumber(ARGV[5])
        local sid = ARGV[6]

        local live = {}
        for _, id in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
            if redis.call('EXISTS', session_key(prefix, id)) == 1 then
                table.insert(live, id)
            else
                redis.call('LREM', KEYS[1], 0, id)
            end
        end

        local evicted = {'admitted'}
        if max > 0 and #live >= max then
            if policy ~= 'evict' then
                local rejected = {'rejected'}
                for _, id in ipairs(live) do
                    table.insert(rejected, id)
                end
                return rejected
            end

            while #live >= max do
                local victim = table.remove(live, 1)
                local vkey = session_key(prefix, victim)
                local fields = redis.call('HMGET', vkey, 'refresh_token_id', 'access_token_id', 'access_expires_at')
                blacklist(prefix, fields[2], fields[3], now)
                if fields[1] then
                    redis.call('DEL', prefix .. ':refresh:' .. fields[1])
                end
                redis.call('DEL', vkey)
                redis.call('LREM', KEYS[1], 0, victim)
                table.insert(evicted, victim)
            end
        end

        redis.call('HSET', KEYS[2], unpack(ARGV, 7))
        redis.call('PEXPIRE', KEYS[2], ttl)
        redis.call('SET', KEYS[3], sid, 'PX', ttl)
        redis.call('RPUSH', KEYS[1], sid)
        if redis.call('PTTL', KEYS[1]) < ttl then
            redis.call('PEXPIRE', KEYS[1], ttl)
        end

        return evicted
        "#,
    )
});

/// 删除会话
///
/// KEYS[1] 会话记录；ARGV[1] 键前缀，ARGV[2] 会话 ID，ARGV[3] 当前毫秒，
/// ARGV[4] 期望的当前访问令牌 ID（空串表示不校验）。
/// 当前访问令牌加入黑名单，刷新令牌指针与索引条目一并删除。返回 1 / 0。
pub(crate) static DELETE_SESSION: Lazy<Script> = Lazy::new(|| {
    with_prelude(
        r#"
        local prefix = ARGV[1]
        local sid = ARGV[2]
        local now = tonumber(ARGV[3])

        local fields = redis.call('HMGET', KEYS[1], 'user_id', 'device_type', 'refresh_token_id', 'access_token_id', 'access_expires_at')
        if not fields[1] then
            return 0
        end
        if ARGV[4] ~= '' and fields[4] ~= ARGV[4] then
            return 0
        end

        blacklist(prefix, fields[4], fields[5], now)
        if fields[3] then
            redis.call('DEL', prefix .. ':refresh:' .. fields[3])
        end
        redis.call('LREM', prefix .. ':devices:' .. fields[1] .. ':' .. fields[2], 0, sid)
        redis.call('DEL', KEYS[1])
        return 1
        "#,
    )
});

/// 按刷新令牌查找会话
///
/// KEYS[1] 刷新令牌指针，KEYS[2] 退役标记；ARGV[1] 键前缀。
/// 返回 {'active', 字段...}、{'retired', 会话 ID} 或 {'unknown'}。
pub(crate) static FIND_BY_REFRESH: Lazy<Script> = Lazy::new(|| {
    with_prelude(
        r#"
        local sid = redis.call('GET', KEYS[1])
        if sid then
            local data = redis.call('HGETALL', session_key(ARGV[1], sid))
            if #data > 0 then
                local result = {'active'}
                for _, value in ipairs(data) do
                    table.insert(result, value)
                end
                return result
            end
        end

        local retired = redis.call('GET', KEYS[2])
        if retired then
            return {'retired', retired}
        end
        return {'unknown'}
        "#,
    )
});

/// 比较并轮换刷新令牌
///
/// KEYS[1] 会话记录，KEYS[2] 旧刷新令牌指针，KEYS[3] 新刷新令牌指针，KEYS[4] 旧令牌退役标记。
/// ARGV[1] 键前缀，ARGV[2] 会话 ID，ARGV[3] 旧刷新令牌，ARGV[4] 新刷新令牌，
/// ARGV[5] 新访问令牌 ID，ARGV[6] 新访问令牌过期毫秒，ARGV[7] 当前毫秒。
pub(crate) static ROTATE_REFRESH: Lazy<Script> = Lazy::new(|| {
    with_prelude(
        r#"
        local prefix = ARGV[1]
        local sid = ARGV[2]
        local now = tonumber(ARGV[7])

        if redis.call('GET', KEYS[2]) ~= sid then
            return 0
        end
        if redis.call('HGET', KEYS[1], 'refresh_token_id') ~= ARGV[3] then
            return 0
        end
        local ttl = redis.call('PTTL', KEYS[1])
        if ttl <= 0 then
            return 0
        end

        local previous = redis.call('HMGET', KEYS[1], 'access_token_id', 'access_expires_at')
        blacklist(prefix, previous[1], previous[2], now)

        redis.call('DEL', KEYS[2])
        redis.call('SET', KEYS[4], sid, 'PX', ttl)
        redis.call('SET', KEYS[3], sid, 'PX', ttl)
        redis.call('HSET', KEYS[1],
            'refresh_token_id', ARGV[4],
            'access_token_id', ARGV[5],
            'access_expires_at', ARGV[6])
        return 1
        "#,
    )
});

/// 更换访问令牌
///
/// KEYS[1] 会话记录；ARGV[1] 键前缀，ARGV[2] 新访问令牌 ID，ARGV[3] 过期毫秒，ARGV[4] 当前毫秒。
pub(crate) static TOUCH_SESSION: Lazy<Script> = Lazy::new(|| {
    with_prelude(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end

        local previous = redis.call('HMGET', KEYS[1], 'access_token_id', 'access_expires_at')
        if previous[1] ~= ARGV[2] then
            blacklist(ARGV[1], previous[1], previous[2], tonumber(ARGV[4]))
        end
        redis.call('HSET', KEYS[1], 'access_token_id', ARGV[2], 'access_expires_at', ARGV[3])
        return 1
        "#,
    )
});

/// 访问令牌状态检查
///
/// KEYS[1] 黑名单键，KEYS[2] 会话记录；ARGV[1] 访问令牌 ID。
/// 令牌必须是会话当前的访问令牌。
pub(crate) static INSPECT_ACCESS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return {'revoked'}
        end
        local fields = redis.call('HMGET', KEYS[2], 'user_id', 'access_token_id')
        if not fields[1] then
            return {'missing'}
        end
        if fields[2] ~= ARGV[1] then
            return {'revoked'}
        end
        return {'active', fields[1]}
        "#,
    )
});
